//! Day-partitioned duplicate ledger for captured exceptions.
//!
//! This crate provides:
//! - `Fingerprint`, the RIPEMD-160 identity of an exception
//! - `BlobStore` with filesystem and in-memory implementations
//! - `DuplicateLedger`, an atomic check-and-insert over one record per day

pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod store;

pub use error::LedgerError;
pub use fingerprint::Fingerprint;
pub use ledger::{day_key, DuplicateLedger, Occurrence};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, StoreLock};
