//! Storage errors.
//!
//! Every failure names the table or redb step it came from, and converts
//! into the relay error so repositories can return `thingrelay_core::Result`.

use thiserror::Error;

use thingrelay_core::error::Error as RelayError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage file: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A redb call failed; `step` names it (open, begin, table, read, commit).
    #[error("redb {step}: {message}")]
    Database { step: &'static str, message: String },

    #[error("no record {0}")]
    NotFound(String),

    #[error("bad record key: {0}")]
    InvalidKey(String),
}

impl From<Error> for RelayError {
    fn from(e: Error) -> Self {
        match e {
            Error::Encoding(e) => RelayError::Serialization(e.to_string()),
            Error::NotFound(what) => RelayError::NotFound(what),
            Error::InvalidKey(what) => RelayError::Validation(what),
            other => RelayError::Storage(other.to_string()),
        }
    }
}

macro_rules! redb_step {
    ($($source:ty => $step:literal),* $(,)?) => {
        $(
            impl From<$source> for Error {
                fn from(e: $source) -> Self {
                    Error::Database {
                        step: $step,
                        message: e.to_string(),
                    }
                }
            }
        )*
    };
}

redb_step! {
    redb::DatabaseError => "open",
    redb::TransactionError => "begin",
    redb::TableError => "table",
    redb::StorageError => "read",
    redb::CommitError => "commit",
}
