use std::sync::Arc;

use savesync_core::clock::file_stamp;
use savesync_core::{
    Clock, MigrationPipeline, MigrationReport, SaveDocument, SessionId, WriteThrottle,
};
use savesync_storage::{RemoteStore, Store};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::SaveConfig;
use crate::decision::ConflictDecision;
use crate::error::EngineError;
use crate::notify::{ChangeNotifier, ListenerId};
use crate::resolver::ConflictResolver;

/// Result of [`SaveSession::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written to the local store; listeners were notified.
    Persisted,
    /// Throttled. The write happens on a later `tick` or `flush`.
    Deferred,
    /// The local write failed. The request stays pending.
    Failed,
}

/// Owns the in-memory save document and wires migration, throttling, local
/// persistence, change notification and cloud sync.
pub struct SaveSession<L: Store, R: RemoteStore> {
    config: SaveConfig,
    local: L,
    sync: ConflictResolver<R>,
    pipeline: MigrationPipeline,
    throttle: WriteThrottle,
    clock: Arc<dyn Clock>,
    defaults: Map<String, Value>,
    current: SaveDocument,
    notifier: ChangeNotifier<SaveDocument>,
    session_id: SessionId,
    last_migration: MigrationReport,
    last_load_failure: Option<String>,
}

impl<L: Store, R: RemoteStore> SaveSession<L, R> {
    /// Build a session. Nothing is read or written until [`start`](Self::start)
    /// or [`load_or_create`](Self::load_or_create).
    ///
    /// `defaults` are the domain fields of a brand-new document.
    pub fn new(
        config: SaveConfig,
        local: L,
        remote: R,
        pipeline: MigrationPipeline,
        defaults: Map<String, Value>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        pipeline.verify_chain()?;

        let sync = ConflictResolver::new(remote, config.sync.clone(), clock.clone());
        let throttle = WriteThrottle::new(config.min_write_interval());
        let current = SaveDocument::fresh(pipeline.latest_version(), &defaults);

        Ok(Self {
            config,
            local,
            sync,
            pipeline,
            throttle,
            clock,
            defaults,
            current,
            notifier: ChangeNotifier::new(),
            session_id: SessionId::new(),
            last_migration: MigrationReport::default(),
            last_load_failure: None,
        })
    }

    /// Boot sequence: load the local save and attempt startup sync.
    ///
    /// With no local save, the sync attempt runs first so a remote-only save
    /// is downloaded rather than replaced by defaults.
    pub fn start(&mut self) {
        info!(session = %self.session_id, "save session starting");
        if self.local.exists(&self.config.save_file_name) {
            self.load_or_create();
            self.run_startup_sync();
            return;
        }

        let reloaded = self
            .run_startup_sync()
            .is_some_and(|decision| decision.replaced_local());
        if !reloaded {
            self.load_or_create();
        }
    }

    /// Load the local save through the migration pipeline, or fall back to a
    /// fresh default document. Never fails; failures are logged and exposed
    /// through [`last_load_failure`](Self::last_load_failure).
    pub fn load_or_create(&mut self) {
        let path = self.config.save_file_name.clone();
        if !self.local.exists(&path) {
            debug!(session = %self.session_id, path = %path, "no local save, creating defaults");
            self.last_migration = MigrationReport::default();
            self.last_load_failure = None;
            self.reset_to_defaults();
            self.persist();
            return;
        }

        match self.read_and_migrate(&path) {
            Ok(document) => {
                self.current = document;
                self.last_load_failure = None;
                if self.last_migration.was_migrated {
                    info!(
                        session = %self.session_id,
                        from = self.last_migration.source_version,
                        to = self.last_migration.final_version,
                        steps = ?self.last_migration.applied_steps,
                        "save migrated"
                    );
                    self.persist();
                }
            }
            Err(reason) => {
                warn!(session = %self.session_id, path = %path, reason = %reason, "local save unusable, starting fresh");
                self.quarantine_corrupt(&path);
                self.last_load_failure = Some(reason);
                self.reset_to_defaults();
                self.persist();
            }
        }
    }

    /// Ask for the current document to be written. A forced save bypasses
    /// the throttle window.
    pub fn save(&mut self, force_immediate: bool) -> SaveOutcome {
        if !self.throttle.request(self.clock.elapsed(), force_immediate) {
            return SaveOutcome::Deferred;
        }
        self.persist()
    }

    /// Periodic host callback. Retries startup sync while it is still owed,
    /// then writes any throttled save whose window has passed.
    ///
    /// An owed write is persisted before a deferred sync attempt, so a
    /// download that replaces the document backs it up instead of dropping it.
    /// The attempt waits for the write window to open.
    pub fn tick(&mut self) -> Option<SaveOutcome> {
        let mut outcome = None;
        if !self.sync.startup_completed() && self.sync.remote().is_available() {
            if self.throttle.has_pending_request() {
                if !self.throttle.try_flush(self.clock.elapsed()) {
                    return None;
                }
                let owed = self.persist();
                if owed == SaveOutcome::Failed {
                    return Some(owed);
                }
                outcome = Some(owed);
            }
            self.run_startup_sync();
        }
        if self.throttle.try_flush(self.clock.elapsed()) {
            return Some(self.persist());
        }
        outcome
    }

    /// Write any owed save now, ignoring the throttle window.
    pub fn flush(&mut self) -> Option<SaveOutcome> {
        if self.throttle.has_pending_request() {
            return Some(self.persist());
        }
        None
    }

    pub fn on_change(&mut self, listener: impl FnMut(&SaveDocument) + 'static) -> ListenerId {
        self.notifier.on(listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.notifier.off(id)
    }

    pub fn current(&self) -> &SaveDocument {
        &self.current
    }

    /// Mutate the document in place. Changes reach storage on the next save.
    pub fn current_mut(&mut self) -> &mut SaveDocument {
        &mut self.current
    }

    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn has_pending_save(&self) -> bool {
        self.throttle.has_pending_request()
    }

    pub fn startup_sync_completed(&self) -> bool {
        self.sync.startup_completed()
    }

    pub fn last_decision(&self) -> Option<ConflictDecision> {
        self.sync.last_decision()
    }

    pub fn last_conflict_decision(&self) -> &'static str {
        self.sync.last_conflict_decision()
    }

    pub fn last_migration_report(&self) -> &MigrationReport {
        &self.last_migration
    }

    pub fn last_load_failure(&self) -> Option<&str> {
        self.last_load_failure.as_deref()
    }

    pub fn local_store(&self) -> &L {
        &self.local
    }

    pub fn local_store_mut(&mut self) -> &mut L {
        &mut self.local
    }

    pub fn remote_store(&self) -> &R {
        self.sync.remote()
    }

    pub fn remote_store_mut(&mut self) -> &mut R {
        self.sync.remote_mut()
    }

    fn run_startup_sync(&mut self) -> Option<ConflictDecision> {
        let path = self.config.save_file_name.clone();
        let decision = self.sync.try_startup_sync(&mut self.local, &path)?;
        if decision.replaced_local() {
            self.load_or_create();
        }
        Some(decision)
    }

    fn read_and_migrate(&mut self, path: &str) -> Result<SaveDocument, String> {
        let raw = self
            .local
            .read(path)
            .map_err(|e| format!("read failed: {e}"))?;

        let prepared = match self.pipeline.prepare_for_load(&raw) {
            Ok(prepared) => prepared,
            Err(failure) => {
                let reason = failure.report.failure_reason.clone();
                self.last_migration = failure.report;
                return Err(reason);
            }
        };
        self.last_migration = prepared.report;

        SaveDocument::from_json(&prepared.payload).map_err(|e| e.to_string())
    }

    fn reset_to_defaults(&mut self) {
        self.current = SaveDocument::fresh(self.pipeline.latest_version(), &self.defaults);
    }

    fn quarantine_corrupt(&mut self, path: &str) {
        let backup = format!("{path}.corrupt_{}", file_stamp(self.clock.utc_now()));
        match self.local.copy(path, &backup, true) {
            Ok(()) => warn!(session = %self.session_id, backup = %backup, "corrupt save backed up"),
            Err(e) => warn!(session = %self.session_id, error = %e, "failed to back up corrupt save"),
        }
    }

    fn persist(&mut self) -> SaveOutcome {
        let path = self.config.save_file_name.clone();
        let json = match self.current.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(session = %self.session_id, error = %e, "failed to serialize save");
                return SaveOutcome::Failed;
            }
        };

        if let Err(e) = self.local.write(&path, &json) {
            error!(session = %self.session_id, path = %path, error = %e, "failed to persist save");
            self.throttle.mark_pending();
            return SaveOutcome::Failed;
        }

        self.throttle.mark_persisted(self.clock.elapsed());
        self.notifier.emit(&self.current);
        self.sync.on_local_persisted(&self.local, &path);
        SaveOutcome::Persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use savesync_core::ManualClock;
    use savesync_core::migration::DefaultsMigrator;
    use savesync_storage::MemoryStore;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    fn defaults() -> Map<String, Value> {
        let Value::Object(map) = json!({"coins": 0, "trips": 0}) else {
            unreachable!()
        };
        map
    }

    fn session() -> (Arc<ManualClock>, SaveSession<MemoryStore, MemoryStore>) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let pipeline = MigrationPipeline::new(1)
            .with_migrator(DefaultsMigrator::new(0, defaults()))
            .unwrap();
        let session = SaveSession::new(
            SaveConfig::default(),
            MemoryStore::new(clock.clone()),
            MemoryStore::new(clock.clone()),
            pipeline,
            defaults(),
            clock.clone(),
        )
        .unwrap();
        (clock, session)
    }

    #[test]
    fn first_boot_creates_and_persists_defaults() {
        let (_clock, mut s) = session();
        s.start();

        assert_eq!(s.current().schema_version(), 1);
        assert_eq!(s.current().get::<i64>("coins").unwrap(), Some(0));
        assert!(s.local_store().exists("save_v1.json"));
        assert_eq!(s.last_conflict_decision(), "no_save_data");
        // Startup sync completed before the first persist, so it was uploaded.
        assert!(s.remote_store().exists("save_v1.meta.json"));
    }

    #[test]
    fn throttled_save_is_drained_by_tick() {
        let (clock, mut s) = session();
        s.start();

        s.current_mut().set("coins", 5).unwrap();
        assert_eq!(s.save(false), SaveOutcome::Deferred);
        assert!(s.has_pending_save());
        assert_eq!(s.tick(), None);

        clock.advance(Duration::from_millis(1_000));
        assert_eq!(s.tick(), Some(SaveOutcome::Persisted));
        assert!(!s.has_pending_save());
        assert!(s.local_store().read("save_v1.json").unwrap().contains("\"coins\": 5"));
    }

    #[test]
    fn listeners_fire_once_per_persist() {
        let (clock, mut s) = session();
        s.start();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let id = s.on_change(move |_| h.set(h.get() + 1));

        assert_eq!(s.save(false), SaveOutcome::Deferred);
        assert_eq!(hits.get(), 0);
        assert_eq!(s.save(true), SaveOutcome::Persisted);
        assert_eq!(hits.get(), 1);

        assert!(s.off(id));
        clock.advance(Duration::from_secs(5));
        assert_eq!(s.save(false), SaveOutcome::Persisted);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn failed_write_stays_pending() {
        let (clock, mut s) = session();
        s.start();
        s.local_store_mut().set_fail_writes(true);
        assert_eq!(s.save(true), SaveOutcome::Failed);
        assert!(s.has_pending_save());

        s.local_store_mut().set_fail_writes(false);
        clock.advance(Duration::from_secs(1));
        assert_eq!(s.tick(), Some(SaveOutcome::Persisted));
    }

    #[test]
    fn flush_ignores_the_window() {
        let (_clock, mut s) = session();
        s.start();
        assert_eq!(s.flush(), None);
        assert_eq!(s.save(false), SaveOutcome::Deferred);
        assert_eq!(s.flush(), Some(SaveOutcome::Persisted));
    }
}
