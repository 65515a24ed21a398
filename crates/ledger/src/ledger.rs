//! The per-day set of exception fingerprints.
//!
//! Each day owns one record, `<DD.MM.YYYY>.json`, holding a JSON array of
//! fingerprints in insertion order. Records appear lazily the first time a
//! day is checked and only ever grow; pruning old days is left to operators.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::debug;

use crate::error::LedgerError;
use crate::fingerprint::Fingerprint;
use crate::store::BlobStore;

const RECORD_SUFFIX: &str = ".json";

/// Result of [`DuplicateLedger::check_and_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    /// Not seen today; it has now been recorded.
    First,
    /// Already recorded today.
    Repeat,
}

/// Day-key for a calendar date, e.g. `"07.03.2025"`.
pub fn day_key(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

fn record_key(day_key: &str) -> String {
    format!("{day_key}{RECORD_SUFFIX}")
}

pub struct DuplicateLedger {
    store: Arc<dyn BlobStore>,
    /// Serialises check-and-insert between threads of this process before
    /// they contend on the store lock.
    local: Mutex<()>,
    lock_timeout: Duration,
}

impl DuplicateLedger {
    pub fn new(store: Arc<dyn BlobStore>, lock_timeout: Duration) -> Self {
        Self {
            store,
            local: Mutex::new(()),
            lock_timeout,
        }
    }

    /// Record `fingerprint` under `day_key` unless it is already there.
    ///
    /// Lookup and insert happen under one lock, so concurrent first
    /// occurrences of the same fingerprint yield exactly one
    /// [`Occurrence::First`].
    pub fn check_and_insert(
        &self,
        day_key: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Occurrence, LedgerError> {
        let key = record_key(day_key);
        let _local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        let _store = self.store.lock(&key, self.lock_timeout)?;

        let mut entries = self.load_or_init(&key)?;
        if entries.iter().any(|e| e == fingerprint.as_str()) {
            debug!(day = day_key, %fingerprint, "duplicate exception");
            return Ok(Occurrence::Repeat);
        }

        entries.push(fingerprint.as_str().to_string());
        self.persist(&key, &entries)?;
        debug!(day = day_key, %fingerprint, total = entries.len(), "recorded exception");
        Ok(Occurrence::First)
    }

    /// Fingerprints recorded for `day_key`, in insertion order.
    ///
    /// Unlike [`check_and_insert`](Self::check_and_insert) this never creates
    /// a record.
    pub fn entries(&self, day_key: &str) -> Result<Vec<String>, LedgerError> {
        let key = record_key(day_key);
        if !self.store.exists(&key)? {
            return Ok(Vec::new());
        }
        self.decode(&key)
    }

    pub fn contains(&self, day_key: &str, fingerprint: &Fingerprint) -> Result<bool, LedgerError> {
        Ok(self
            .entries(day_key)?
            .iter()
            .any(|e| e == fingerprint.as_str()))
    }

    /// Day-keys that have a record, in store order.
    pub fn days(&self) -> Result<Vec<String>, LedgerError> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_suffix(RECORD_SUFFIX).map(str::to_string))
            .collect())
    }

    fn load_or_init(&self, key: &str) -> Result<Vec<String>, LedgerError> {
        if !self.store.exists(key)? {
            self.persist(key, &[])?;
            return Ok(Vec::new());
        }
        self.decode(key)
    }

    fn decode(&self, key: &str) -> Result<Vec<String>, LedgerError> {
        let bytes = self.store.read(key)?;
        serde_json::from_slice(&bytes).map_err(|source| LedgerError::Corrupt {
            key: key.to_string(),
            source,
        })
    }

    fn persist(&self, key: &str, entries: &[String]) -> Result<(), LedgerError> {
        let json = serde_json::to_vec(entries).map_err(|source| LedgerError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        self.store.write(key, &json)
    }
}

impl std::fmt::Debug for DuplicateLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateLedger")
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}
