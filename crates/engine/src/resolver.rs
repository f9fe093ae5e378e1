use std::sync::Arc;

use chrono::{DateTime, Utc};
use savesync_core::Clock;
use savesync_core::clock::file_stamp;
use savesync_core::integrity::{self, CloudManifest, IntegrityError};
use savesync_storage::{RemoteStore, StorageError, Store};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::decision::ConflictDecision;
use crate::error::SyncError;

enum RemotePayload {
    Text(String),
    Blank,
    Unreadable,
}

enum RemoteManifest {
    Absent,
    Unusable(IntegrityError),
    Present(CloudManifest),
}

#[derive(Clone, Copy)]
enum Side {
    Local,
    Cloud,
}

impl Side {
    fn as_str(&self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Cloud => "cloud",
        }
    }
}

/// Startup reconciliation runs once per process and picks the authoritative
/// replica. After that, every persisted local change is pushed to the remote
/// with a fresh manifest. Anything discarded is first copied to a conflict
/// sidecar next to the local save.
pub struct ConflictResolver<R: RemoteStore> {
    remote: R,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    startup_completed: bool,
    remote_unreadable: bool,
    last_decision: Option<ConflictDecision>,
}

impl<R: RemoteStore> ConflictResolver<R> {
    pub fn new(remote: R, config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            config,
            clock,
            startup_completed: false,
            remote_unreadable: false,
            last_decision: None,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn startup_completed(&self) -> bool {
        self.startup_completed
    }

    pub fn last_decision(&self) -> Option<ConflictDecision> {
        self.last_decision
    }

    /// Snake-case form of the last decision, empty before the first one.
    pub fn last_conflict_decision(&self) -> &'static str {
        self.last_decision.map(|d| d.as_str()).unwrap_or("")
    }

    /// Run startup reconciliation if it has not completed yet and the remote
    /// is reachable. Returns `None` when nothing was decided; call again on a
    /// later tick.
    ///
    /// Sync stays owed (and uploads stay blocked) while the remote goes away
    /// mid-pass or its payload cannot be read. Any other error is absorbed:
    /// sync is marked complete with [`ConflictDecision::SyncFailed`] and the
    /// local replica stays as is.
    pub fn try_startup_sync<L: Store + ?Sized>(
        &mut self,
        local: &mut L,
        local_path: &str,
    ) -> Option<ConflictDecision> {
        if self.startup_completed {
            return None;
        }
        if !self.remote.is_available() {
            debug!("remote unavailable, startup sync deferred");
            return None;
        }

        let previous = self.last_decision;
        let decision = match self.perform_startup_sync(local, local_path) {
            Ok(ConflictDecision::CloudReadFailedKeepLocal) if self.remote_unreadable => {
                if previous != Some(ConflictDecision::CloudReadFailedKeepLocal) {
                    warn!("remote save unreadable, uploads held until it can be read");
                }
                return Some(ConflictDecision::CloudReadFailedKeepLocal);
            }
            Ok(decision) => decision,
            Err(SyncError::RemoteUnavailable) => {
                debug!("remote went away during startup sync, deferred");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "startup sync failed, local save remains canonical");
                self.last_decision = Some(ConflictDecision::SyncFailed);
                ConflictDecision::SyncFailed
            }
        };
        self.startup_completed = true;
        Some(decision)
    }

    /// Decide which replica is authoritative and move data accordingly.
    /// Does not check or set the completion flag.
    pub fn perform_startup_sync<L: Store + ?Sized>(
        &mut self,
        local: &mut L,
        local_path: &str,
    ) -> Result<ConflictDecision, SyncError> {
        let local_exists = local.exists(local_path);
        let remote_exists = self.remote.exists(&self.config.cloud_save_file_name);

        let decision = match (local_exists, remote_exists) {
            (false, false) => ConflictDecision::NoSaveData,
            (false, true) => self.reconcile_cloud_only(local, local_path)?,
            (true, false) => {
                self.upload_local_to_cloud(local, local_path)?;
                ConflictDecision::LocalOnlyUploaded
            }
            (true, true) => self.reconcile_both(local, local_path)?,
        };

        self.last_decision = Some(decision);
        if self.config.verbose_logs {
            info!(decision = %decision, "startup sync decision");
        } else {
            debug!(decision = %decision, "startup sync decision");
        }
        Ok(decision)
    }

    /// Push the local save and a freshly computed manifest to the remote.
    /// A missing local save is a no-op.
    pub fn upload_local_to_cloud<L: Store + ?Sized>(
        &mut self,
        local: &L,
        local_path: &str,
    ) -> Result<(), SyncError> {
        if !self.remote.is_available() {
            return Err(SyncError::RemoteUnavailable);
        }
        if !local.exists(local_path) {
            return Ok(());
        }

        let text = local.read(local_path)?;
        self.remote.write(&self.config.cloud_save_file_name, &text)?;
        self.write_manifest(local, local_path, &text)?;
        debug!(bytes = text.len(), "local save uploaded");
        Ok(())
    }

    /// Ongoing sync hook, called after each persisted local write. Skipped
    /// until startup sync has completed or while the remote is unavailable.
    /// Failures are logged and never propagated. Returns true on upload.
    pub fn on_local_persisted<L: Store + ?Sized>(&mut self, local: &L, local_path: &str) -> bool {
        if !self.config.auto_sync_on_save || !self.startup_completed {
            return false;
        }
        if !self.remote.is_available() {
            return false;
        }
        match self.upload_local_to_cloud(local, local_path) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    error = %e,
                    name = %self.config.cloud_save_file_name,
                    "failed to upload save to cloud"
                );
                false
            }
        }
    }

    fn reconcile_cloud_only<L: Store + ?Sized>(
        &mut self,
        local: &mut L,
        local_path: &str,
    ) -> Result<ConflictDecision, SyncError> {
        let Some(cloud_text) = self.read_remote_payload()? else {
            return Ok(ConflictDecision::CloudReadFailedKeepLocal);
        };

        match self.read_remote_manifest()? {
            RemoteManifest::Present(manifest) => {
                if let Err(e) = integrity::validate_payload(&cloud_text, &manifest) {
                    warn!(error = %e, "rejecting remote save that fails its manifest");
                    self.backup(local, local_path, Side::Cloud, Some(&cloud_text))?;
                    return Ok(ConflictDecision::CloudOnlyRejected);
                }
            }
            // Legacy remote without a usable manifest: accepted since there
            // is no local save to protect.
            RemoteManifest::Absent => debug!("remote save has no manifest, accepting"),
            RemoteManifest::Unusable(e) => {
                debug!(error = %e, "remote manifest unusable, accepting remote save")
            }
        }

        local.write(local_path, &cloud_text)?;
        Ok(ConflictDecision::CloudOnlyDownloaded)
    }

    fn reconcile_both<L: Store + ?Sized>(
        &mut self,
        local: &mut L,
        local_path: &str,
    ) -> Result<ConflictDecision, SyncError> {
        let local_text = local.read(local_path)?;
        let Some(cloud_text) = self.read_remote_payload()? else {
            return Ok(ConflictDecision::CloudReadFailedKeepLocal);
        };

        let manifest = match self.read_remote_manifest()? {
            RemoteManifest::Present(manifest) => manifest,
            RemoteManifest::Absent => {
                warn!("remote save has no manifest, keeping local");
                self.backup(local, local_path, Side::Cloud, Some(&cloud_text))?;
                return Ok(ConflictDecision::CloudIntegrityFailedKeepLocal);
            }
            RemoteManifest::Unusable(e) => {
                warn!(error = %e, "remote manifest unusable, keeping local");
                self.backup(local, local_path, Side::Cloud, Some(&cloud_text))?;
                return Ok(ConflictDecision::CloudIntegrityFailedKeepLocal);
            }
        };

        if let Err(e) = integrity::validate_payload(&cloud_text, &manifest) {
            warn!(error = %e, "remote save fails integrity check, keeping local");
            self.backup(local, local_path, Side::Cloud, Some(&cloud_text))?;
            return Ok(ConflictDecision::CloudIntegrityFailedKeepLocal);
        }

        if local_text == cloud_text {
            return Ok(ConflictDecision::AlreadyInSync);
        }

        let local_time = local.last_modified_utc(local_path)?;
        let cloud_time = self.resolve_remote_timestamp(Some(&manifest));
        let local_horizon = local_time
            .checked_add_signed(self.config.skew_tolerance())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if cloud_time > local_horizon {
            self.backup(local, local_path, Side::Local, None)?;
            local.write(local_path, &cloud_text)?;
            Ok(ConflictDecision::CloudNewerDownloaded)
        } else {
            self.backup(local, local_path, Side::Cloud, Some(&cloud_text))?;
            self.upload_local_to_cloud(local, local_path)?;
            Ok(ConflictDecision::LocalNewerUploaded)
        }
    }

    /// Remote save time: the manifest's `savedAtUtc` when it parses, else the
    /// provider's file timestamp, else the minimum timestamp.
    fn resolve_remote_timestamp(&self, manifest: Option<&CloudManifest>) -> DateTime<Utc> {
        if let Some(at) = manifest.and_then(CloudManifest::saved_at) {
            return at;
        }
        match self.remote.timestamp_unix(&self.config.cloud_save_file_name) {
            Ok(secs) if secs > 0 => {
                DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
            }
            _ => DateTime::<Utc>::MIN_UTC,
        }
    }

    /// `None` when the payload cannot be read or is empty.
    /// `None` when there is no usable remote payload. A failed read marks the
    /// remote unreadable so startup sync stays owed; a blank one does not.
    fn read_remote_payload(&mut self) -> Result<Option<String>, SyncError> {
        let payload = match self.remote.read(&self.config.cloud_save_file_name) {
            Ok(text) if text.trim().is_empty() => RemotePayload::Blank,
            Ok(text) => RemotePayload::Text(text),
            Err(StorageError::Unavailable) => return Err(SyncError::RemoteUnavailable),
            Err(e) => {
                debug!(error = %e, "failed to read remote save");
                RemotePayload::Unreadable
            }
        };
        self.remote_unreadable = matches!(payload, RemotePayload::Unreadable);
        match payload {
            RemotePayload::Text(text) => Ok(Some(text)),
            RemotePayload::Blank => {
                debug!("remote save is blank");
                Ok(None)
            }
            RemotePayload::Unreadable => Ok(None),
        }
    }

    fn read_remote_manifest(&self) -> Result<RemoteManifest, SyncError> {
        let name = &self.config.cloud_manifest_file_name;
        if !self.remote.exists(name) {
            return Ok(RemoteManifest::Absent);
        }
        let text = match self.remote.read(name) {
            Ok(text) => text,
            Err(StorageError::Unavailable) => return Err(SyncError::RemoteUnavailable),
            Err(e) => {
                return Ok(RemoteManifest::Unusable(IntegrityError::ManifestUnparseable(
                    e.to_string(),
                )));
            }
        };
        Ok(match integrity::parse_manifest(&text) {
            Ok(manifest) => RemoteManifest::Present(manifest),
            Err(e) => RemoteManifest::Unusable(e),
        })
    }

    fn write_manifest<L: Store + ?Sized>(
        &mut self,
        local: &L,
        local_path: &str,
        text: &str,
    ) -> Result<(), SyncError> {
        let saved_at = local.last_modified_utc(local_path)?;
        let manifest = CloudManifest::for_payload(text, saved_at);
        self.remote
            .write(&self.config.cloud_manifest_file_name, &manifest.to_json()?)?;
        Ok(())
    }

    /// Copy the discarded side next to the local save. `cloud_text` carries
    /// the remote payload when the cloud side is being discarded.
    fn backup<L: Store + ?Sized>(
        &self,
        local: &mut L,
        local_path: &str,
        side: Side,
        cloud_text: Option<&str>,
    ) -> Result<String, SyncError> {
        let sidecar = self.sidecar_path(local, local_path, side);
        match (side, cloud_text) {
            (Side::Cloud, Some(text)) => local.write(&sidecar, text)?,
            _ => local.copy(local_path, &sidecar, false)?,
        }
        info!(path = %sidecar, side = side.as_str(), "conflict backup written");
        Ok(sidecar)
    }

    fn sidecar_path<L: Store + ?Sized>(&self, local: &L, local_path: &str, side: Side) -> String {
        let base = format!(
            "{}{}_{}",
            conflict_prefix(local_path),
            side.as_str(),
            file_stamp(self.clock.utc_now())
        );
        if !local.exists(&base) {
            return base;
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{base}_{n}");
            if !local.exists(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Prefix shared by every conflict sidecar of `local_path`.
pub fn conflict_prefix(local_path: &str) -> String {
    format!("{local_path}.conflict_")
}
