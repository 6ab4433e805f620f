//! StateError — what can go wrong reading or writing switchyard.redb.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// The database file could not be created or opened.
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    /// A stored record no longer matches the current schema.
    #[error("cannot decode record: {0}")]
    Deserialize(String),

    #[error("no deployment record for service {service}")]
    DeploymentNotFound { service: String },

    /// A toggle write carried a revision at or below the stored one.
    #[error("toggle {name} is already at revision {stored}, refusing revision {attempted}")]
    StaleToggle { name: String, stored: u64, attempted: u64 },
}
