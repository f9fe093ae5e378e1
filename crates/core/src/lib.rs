pub mod clock;
pub mod document;
pub mod error;
pub mod ids;
pub mod integrity;
pub mod migration;
pub mod throttle;

pub use clock::{Clock, ManualClock, SystemClock};
pub use document::SaveDocument;
pub use error::CoreError;
pub use ids::SessionId;
pub use integrity::{CloudManifest, IntegrityError};
pub use migration::{MigrationError, MigrationFailure, MigrationPipeline, MigrationReport, Migrator};
pub use throttle::WriteThrottle;
