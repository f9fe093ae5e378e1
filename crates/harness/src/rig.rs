use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use savesync_core::migration::{BoxError, DefaultsMigrator, FnMigrator};
use savesync_core::{CloudManifest, CoreError, ManualClock, MigrationPipeline};
use savesync_engine::{EngineError, SaveConfig, SaveSession};
use savesync_storage::{MemoryStore, RemoteStore, StorageError, Store};
use serde_json::{Map, Value, json};

/// Wall-clock time every rig starts at.
pub const EPOCH: i64 = 1_700_000_000;
pub const LATEST_VERSION: u32 = 2;

/// `EPOCH + offset_secs` as a timestamp.
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(EPOCH + offset_secs, 0).unwrap_or_default()
}

/// Fields of a brand-new v2 save.
pub fn sample_defaults() -> Map<String, Value> {
    object(json!({
        "coins": 0,
        "stats": { "totalTrips": 0 },
        "tutorialSeen": false,
    }))
}

/// v0 -> v1 fills the flat v1 fields; v1 -> v2 moves `trips` under `stats`.
pub fn sample_pipeline() -> Result<MigrationPipeline, CoreError> {
    let v1_defaults = object(json!({ "coins": 0, "trips": 0, "tutorialSeen": false }));
    MigrationPipeline::new(LATEST_VERSION)
        .with_migrator(DefaultsMigrator::new(0, v1_defaults))?
        .with_migrator(FnMigrator::new(1, nest_trip_stats))
}

fn nest_trip_stats(input: &str) -> Result<String, BoxError> {
    let mut value: Value = serde_json::from_str(input)?;
    let object = value.as_object_mut().ok_or("v1 save is not an object")?;
    let trips = match object.remove("trips") {
        None | Some(Value::Null) => 0,
        Some(v) => v.as_u64().ok_or("trips is not a number")?,
    };
    object.insert("stats".into(), json!({ "totalTrips": trips }));
    object.insert("saveVersion".into(), json!(2));
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Pretty JSON for a save at `version` (omitted for legacy payloads).
pub fn save_json(version: Option<u32>, fields: Value) -> String {
    let mut map = object(fields);
    if let Some(version) = version {
        map.insert("saveVersion".into(), json!(version));
    }
    serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_default()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// A wired session over an in-memory local store, a remote of choice and
/// a manual clock. Nothing runs until `start`.
pub struct TestRig<R: RemoteStore = MemoryStore> {
    pub clock: Arc<ManualClock>,
    pub session: SaveSession<MemoryStore, R>,
}

impl TestRig<MemoryStore> {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(SaveConfig::default())
    }

    pub fn with_config(config: SaveConfig) -> Result<Self, EngineError> {
        let clock = Arc::new(ManualClock::new(at(0)));
        let remote = MemoryStore::new(clock.clone());
        Self::with_remote(config, clock, remote)
    }
}

impl<R: RemoteStore> TestRig<R> {
    pub fn with_remote(
        config: SaveConfig,
        clock: Arc<ManualClock>,
        remote: R,
    ) -> Result<Self, EngineError> {
        let local = MemoryStore::new(clock.clone());
        let session = SaveSession::new(
            config,
            local,
            remote,
            sample_pipeline()?,
            sample_defaults(),
            clock.clone(),
        )?;
        Ok(Self { clock, session })
    }

    pub fn save_path(&self) -> String {
        self.session.config().save_file_name.clone()
    }

    pub fn advance(&self, secs: f64) {
        self.clock.advance(Duration::from_secs_f64(secs));
    }

    /// Place a local save last modified at `modified`.
    pub fn seed_local(&mut self, text: &str, modified: DateTime<Utc>) {
        let path = self.save_path();
        self.session.local_store_mut().put_at(&path, text, modified);
    }

    /// Upload `text` with a valid manifest claiming `saved_at`.
    pub fn seed_remote(
        &mut self,
        text: &str,
        saved_at: DateTime<Utc>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let manifest = CloudManifest::for_payload(text, saved_at).to_json()?;
        self.seed_remote_payload(text)?;
        self.seed_remote_manifest(&manifest)?;
        Ok(())
    }

    pub fn seed_remote_payload(&mut self, text: &str) -> Result<(), StorageError> {
        let name = self.session.config().sync.cloud_save_file_name.clone();
        self.session.remote_store_mut().write(&name, text)
    }

    pub fn seed_remote_manifest(&mut self, text: &str) -> Result<(), StorageError> {
        let name = self.session.config().sync.cloud_manifest_file_name.clone();
        self.session.remote_store_mut().write(&name, text)
    }

    pub fn local_text(&self) -> Option<String> {
        self.session.local_store().read(&self.save_path()).ok()
    }

    pub fn remote_text(&self) -> Option<String> {
        let name = &self.session.config().sync.cloud_save_file_name;
        self.session.remote_store().read(name).ok()
    }

    pub fn remote_manifest(&self) -> Option<CloudManifest> {
        let name = &self.session.config().sync.cloud_manifest_file_name;
        let text = self.session.remote_store().read(name).ok()?;
        savesync_core::integrity::parse_manifest(&text).ok()
    }

    /// Local files whose name starts with `<save>.<kind>`, e.g.
    /// `conflict_cloud_` or `corrupt_`.
    pub fn local_backups(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{}.{kind}", self.save_path());
        self.session.local_store().paths_with_prefix(&prefix)
    }

    pub fn coins(&self) -> Option<i64> {
        self.session.current().get("coins").ok().flatten()
    }
}
