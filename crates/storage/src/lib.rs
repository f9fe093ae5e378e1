pub mod error;
pub mod fs;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteRemoteStore;
pub use traits::*;
