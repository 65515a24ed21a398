//! Blob storage backing the duplicate ledger.
//!
//! A store holds opaque byte records under flat string keys and can lock a
//! key so that a read-modify-write sequence on it is exclusive across every
//! handle sharing the same backing data.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::LedgerError;

const LOCK_RETRY: Duration = Duration::from_millis(5);
const RELEASE_WAIT: Duration = Duration::from_secs(1);

const LOCK_SUFFIX: &str = ".lock";
const BREAKER_SUFFIX: &str = ".lock.break";

/// Lock files older than this are assumed to belong to a crashed process.
const DEFAULT_STALE_LOCK: Duration = Duration::from_secs(30);

pub trait BlobStore: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool, LedgerError>;

    fn read(&self, key: &str) -> Result<Vec<u8>, LedgerError>;

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), LedgerError>;

    /// All record keys, sorted.
    fn keys(&self) -> Result<Vec<String>, LedgerError>;

    /// Acquire exclusive access to `key`, waiting at most `timeout`.
    ///
    /// The returned guard releases the lock when dropped.
    fn lock(&self, key: &str, timeout: Duration) -> Result<StoreLock, LedgerError>;
}

/// Guard returned by [`BlobStore::lock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct StoreLock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl StoreLock {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard that holds nothing.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("held", &self.release.is_some())
            .finish()
    }
}

fn validate_key(key: &str) -> Result<(), LedgerError> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\'])
        || key.ends_with(LOCK_SUFFIX)
        || key.ends_with(BREAKER_SUFFIX)
        || key.ends_with(".tmp")
    {
        return Err(LedgerError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ── Filesystem ────────────────────────────────────────────────

/// One file per key inside a directory.
///
/// ```text
/// ledger/
///   14.03.2025.json              ← record
///   14.03.2025.json.lock         ← holder token while a writer holds the key
///   14.03.2025.json.lock.break   ← present for the instant a lock file is removed
/// ```
///
/// Writes go to a temp file and are renamed into place, so readers never see
/// a torn record. Locks are exclusive-create lock files, which also
/// serialise separate processes sharing the directory.
///
/// Each lock file holds a unique holder token. A lock file is only ever
/// removed under the short-lived `.break` guard, after checking that it
/// still carries the expected token, so a holder whose lock was broken as
/// stale cannot delete its successor's lock, and two contenders cannot both
/// break the same stale lock.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    stale_after: Duration,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            stale_after: DEFAULT_STALE_LOCK,
        })
    }

    /// Override how old a lock file must be before it is broken.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    fn path(&self, key: &str) -> Result<PathBuf, LedgerError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{LOCK_SUFFIX}"))
    }

    fn is_stale(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > self.stale_after)
    }

    /// Run `f` while holding the removal guard for `key`.
    ///
    /// Returns `Ok(None)` if the guard could not be taken within `wait`.
    fn with_breaker<T>(
        &self,
        key: &str,
        wait: Duration,
        f: impl FnOnce() -> T,
    ) -> io::Result<Option<T>> {
        let path = self.root.join(format!("{key}{BREAKER_SUFFIX}"));
        let start = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    let out = f();
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %e, "failed to remove lock breaker");
                    }
                    return Ok(Some(out));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    // Breaker sections are a read and an unlink; an old
                    // breaker means its owner died inside one.
                    if self.is_stale(&path) {
                        warn!(path = %path.display(), "removing abandoned lock breaker");
                        std::fs::remove_file(&path).ok();
                        continue;
                    }
                }
                Err(e) => return Err(e),
            }

            if start.elapsed() >= wait {
                return Ok(None);
            }
            thread::sleep(LOCK_RETRY);
        }
    }

    /// Remove the lock file at `lock_path` if it still carries `token`.
    ///
    /// Must run under [`with_breaker`](Self::with_breaker).
    fn remove_if_held_by(lock_path: &Path, token: &str) -> io::Result<bool> {
        if read_token(lock_path)?.as_deref() != Some(token) {
            return Ok(false);
        }
        std::fs::remove_file(lock_path)?;
        Ok(true)
    }

    /// Break the lock on `key` if its holder looks dead.
    ///
    /// Returns `true` when the caller should retry acquisition immediately.
    fn break_if_stale(&self, key: &str, wait: Duration) -> io::Result<bool> {
        let lock_path = self.lock_path(key);
        let Some(observed) = read_token(&lock_path)? else {
            // released between our create attempt and the read
            return Ok(true);
        };
        if !self.is_stale(&lock_path) {
            return Ok(false);
        }

        let broken = self.with_breaker(key, wait, || {
            let removed = Self::remove_if_held_by(&lock_path, &observed)?;
            if removed {
                warn!(path = %lock_path.display(), holder = %observed, "broke stale ledger lock");
            }
            Ok::<_, io::Error>(removed)
        })?;
        Ok(broken.transpose()?.unwrap_or(false))
    }

    fn release(&self, key: &str, token: &str) {
        let lock_path = self.lock_path(key);
        let released = self.with_breaker(key, RELEASE_WAIT, || {
            Self::remove_if_held_by(&lock_path, token)
        });

        match released {
            Ok(Some(Ok(true))) => {}
            Ok(Some(Ok(false))) => {
                warn!(path = %lock_path.display(), "ledger lock was broken as stale before release");
            }
            Ok(Some(Err(e))) | Err(e) => {
                warn!(path = %lock_path.display(), error = %e, "failed to release ledger lock");
            }
            Ok(None) => {
                warn!(path = %lock_path.display(), "timed out releasing ledger lock, leaving it to go stale");
            }
        }
    }
}

/// `pid:uuid`, unique per acquisition.
fn lock_token() -> String {
    format!("{}:{}", std::process::id(), Uuid::new_v4())
}

/// Holder token of a lock file, `None` if there is no lock file.
fn read_token(path: &Path) -> io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(token) => Ok(Some(token)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Exclusively create `path` holding `token`. `Ok(false)` if it exists.
fn create_lock_file(path: &Path, token: &str) -> io::Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    if let Err(e) = file.write_all(token.as_bytes()).and_then(|()| file.sync_all()) {
        std::fs::remove_file(path).ok();
        return Err(e);
    }
    Ok(true)
}

impl BlobStore for FsBlobStore {
    fn exists(&self, key: &str) -> Result<bool, LedgerError> {
        Ok(self.path(key)?.try_exists()?)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, LedgerError> {
        Ok(std::fs::read(self.path(key)?)?)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), LedgerError> {
        let path = self.path(key)?;
        let tmp = self.root.join(format!("{key}.tmp"));
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, LedgerError> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if validate_key(&name).is_ok() {
                keys.push(name.into_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn lock(&self, key: &str, timeout: Duration) -> Result<StoreLock, LedgerError> {
        validate_key(key)?;
        let lock_path = self.lock_path(key);
        let token = lock_token();
        let start = Instant::now();

        loop {
            if create_lock_file(&lock_path, &token)? {
                debug!(path = %lock_path.display(), "ledger lock acquired");
                let store = self.clone();
                let key = key.to_string();
                return Ok(StoreLock::new(move || store.release(&key, &token)));
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if self.break_if_stale(key, remaining)? {
                continue;
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LedgerError::LockTimeout {
                    key: key.to_string(),
                    waited,
                });
            }
            thread::sleep(LOCK_RETRY);
        }
    }
}

// ── In-memory ─────────────────────────────────────────────────

/// Process-local store. Clones share the same records and locks.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    held: Arc<Mutex<HashSet<String>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn exists(&self, key: &str) -> Result<bool, LedgerError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.contains_key(key))
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, LedgerError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(key).cloned().ok_or_else(|| {
            LedgerError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("no record for {key}"),
            ))
        })
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), LedgerError> {
        validate_key(key)?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, LedgerError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = records.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn lock(&self, key: &str, timeout: Duration) -> Result<StoreLock, LedgerError> {
        let start = Instant::now();
        loop {
            {
                let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
                if held.insert(key.to_string()) {
                    let held_set = Arc::clone(&self.held);
                    let owned = key.to_string();
                    return Ok(StoreLock::new(move || {
                        held_set
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&owned);
                    }));
                }
            }

            let waited = start.elapsed();
            if waited >= timeout {
                debug!(key, ?waited, "memory lock wait exceeded");
                return Err(LedgerError::LockTimeout {
                    key: key.to_string(),
                    waited,
                });
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}
