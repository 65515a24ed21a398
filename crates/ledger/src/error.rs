use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt ledger record {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("timed out after {waited:?} waiting for lock on {key}")]
    LockTimeout { key: String, waited: Duration },

    #[error("invalid ledger key: {0}")]
    InvalidKey(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}
