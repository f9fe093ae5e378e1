use std::fmt;

/// Outcome of a startup reconciliation. Kept for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictDecision {
    NoSaveData,
    CloudOnlyDownloaded,
    CloudOnlyRejected,
    LocalOnlyUploaded,
    CloudReadFailedKeepLocal,
    CloudIntegrityFailedKeepLocal,
    AlreadyInSync,
    CloudNewerDownloaded,
    LocalNewerUploaded,
    /// Reconciliation aborted on an I/O error; local stays authoritative.
    SyncFailed,
}

impl ConflictDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSaveData => "no_save_data",
            Self::CloudOnlyDownloaded => "cloud_only_downloaded",
            Self::CloudOnlyRejected => "cloud_only_rejected",
            Self::LocalOnlyUploaded => "local_only_uploaded",
            Self::CloudReadFailedKeepLocal => "cloud_read_failed_keep_local",
            Self::CloudIntegrityFailedKeepLocal => "cloud_integrity_failed_keep_local",
            Self::AlreadyInSync => "already_in_sync",
            Self::CloudNewerDownloaded => "cloud_newer_downloaded",
            Self::LocalNewerUploaded => "local_newer_uploaded",
            Self::SyncFailed => "sync_failed",
        }
    }

    /// True when the local replica was replaced by the remote one and the
    /// in-memory document must be reloaded.
    pub fn replaced_local(&self) -> bool {
        matches!(self, Self::CloudOnlyDownloaded | Self::CloudNewerDownloaded)
    }
}

impl fmt::Display for ConflictDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
