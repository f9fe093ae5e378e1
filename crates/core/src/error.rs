use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid migrator: {0}")]
    InvalidMigrator(String),

    #[error("broken migration chain: no migrator registered for version {missing}")]
    BrokenChain { missing: u32 },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
