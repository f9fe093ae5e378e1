pub mod config;
pub mod decision;
pub mod error;
pub mod notify;
pub mod resolver;
pub mod session;

pub use config::{SaveConfig, SyncConfig};
pub use decision::ConflictDecision;
pub use error::{EngineError, SyncError};
pub use notify::{ChangeNotifier, ListenerId};
pub use resolver::ConflictResolver;
pub use session::{SaveOutcome, SaveSession};
