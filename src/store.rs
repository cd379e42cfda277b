//! Local key-value store for session state
//!
//! Every key is an independent JSON blob. Reads fall back to defaults and
//! writes are best-effort: callers log failures and carry on, because the
//! in-memory session stays authoritative for the running process.
//!
//! # Error Handling
//!
//! `FileStore` returns `anyhow` errors for I/O, locking and encoding
//! problems. The typed helpers (`load_or_default`, `save_json`) are the
//! intended entry points; a value that fails to decode is treated as missing.

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const STORE_LOCK_TIMEOUT_SECS: u64 = 5;
const STORE_LOCK_RETRY_MS: u64 = 50;

/// Keys of the persisted session layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Language,
    Theme,
    LeftPercent,
    Documents,
    Conversations,
    GlobalPrompt,
    LanguagePrompts,
    Signatures,
    Model,
    Tokens,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Language => "language",
            StoreKey::Theme => "theme",
            StoreKey::LeftPercent => "left_percent",
            StoreKey::Documents => "documents",
            StoreKey::Conversations => "conversations",
            StoreKey::GlobalPrompt => "global_prompt",
            StoreKey::LanguagePrompts => "language_prompts",
            StoreKey::Signatures => "signatures",
            StoreKey::Model => "model",
            StoreKey::Tokens => "tokens",
        }
    }

    pub fn all() -> [StoreKey; 10] {
        [
            StoreKey::Language,
            StoreKey::Theme,
            StoreKey::LeftPercent,
            StoreKey::Documents,
            StoreKey::Conversations,
            StoreKey::GlobalPrompt,
            StoreKey::LanguagePrompts,
            StoreKey::Signatures,
            StoreKey::Model,
            StoreKey::Tokens,
        ]
    }
}

/// Durable storage of named JSON blobs.
pub trait KvStore: Send + Sync {
    /// Raw JSON text for `key`, or `None` when never written.
    fn read(&self, key: StoreKey) -> anyhow::Result<Option<String>>;

    fn write(&self, key: StoreKey, json: &str) -> anyhow::Result<()>;

    fn remove(&self, key: StoreKey) -> anyhow::Result<()>;

    /// Claim the review request slot shared by every session on this store.
    /// `None` when someone else holds it.
    fn try_lock_request(&self) -> anyhow::Result<Option<RequestLock>>;
}

/// Review request slot; released on drop.
pub struct RequestLock {
    held: HeldLock,
}

enum HeldLock {
    File(fs::File),
    Flag(Arc<AtomicBool>),
    /// The store could not be locked; only this process knows about it
    Local,
}

impl RequestLock {
    /// Slot claimed without any backing lock.
    pub fn local() -> Self {
        Self {
            held: HeldLock::Local,
        }
    }
}

impl Drop for RequestLock {
    fn drop(&mut self) {
        match &self.held {
            HeldLock::File(file) => {
                let _ = FileExt::unlock(file);
            }
            HeldLock::Flag(flag) => flag.store(false, Ordering::SeqCst),
            HeldLock::Local => {}
        }
    }
}

/// Decode `key`, falling back to `T::default()` when missing or unreadable.
pub fn load_or_default<T>(store: &dyn KvStore, key: StoreKey) -> T
where
    T: DeserializeOwned + Default,
{
    load(store, key).unwrap_or_default()
}

/// Decode `key` if present and well-formed.
pub fn load<T: DeserializeOwned>(store: &dyn KvStore, key: StoreKey) -> Option<T> {
    let raw = match store.read(key) {
        Ok(raw) => raw?,
        Err(err) => {
            tracing::warn!(key = key.as_str(), error = %err, "failed to read stored value");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key = key.as_str(), error = %err, "ignoring unreadable stored value");
            None
        }
    }
}

pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: StoreKey,
    value: &T,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(value)?;
    store.write(key, &json)
}

// ═══════════════════════════════════════════════════════════════════════════
//  FILE STORE - one JSON file per key
// ═══════════════════════════════════════════════════════════════════════════

pub struct FileStore {
    dir: PathBuf,
}

struct StoreLock {
    file: fs::File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: StoreKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }

    fn ensure_dir(&self) -> anyhow::Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700));
            }
        }
        Ok(())
    }

    /// Blocks the calling thread for up to `STORE_LOCK_TIMEOUT_SECS`.
    fn lock(&self, exclusive: bool) -> anyhow::Result<StoreLock> {
        if exclusive {
            self.ensure_dir()?;
        } else if !self.dir.exists() {
            return Err(anyhow::anyhow!("Store directory missing"));
        }

        let lock_path = self.dir.join(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => break,
                Err(err) => {
                    if !is_contended(&err) {
                        return Err(err.into());
                    }
                    if start.elapsed() >= Duration::from_secs(STORE_LOCK_TIMEOUT_SECS) {
                        return Err(anyhow::anyhow!(
                            "Timed out waiting for store lock ({}s)",
                            STORE_LOCK_TIMEOUT_SECS
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(STORE_LOCK_RETRY_MS));
                }
            }
        }

        Ok(StoreLock { file })
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl KvStore for FileStore {
    fn read(&self, key: StoreKey) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let _lock = self.lock(false)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, key: StoreKey, json: &str) -> anyhow::Result<()> {
        let _lock = self.lock(true)?;
        write_atomic(&self.path_for(key), json)
    }

    fn remove(&self, key: StoreKey) -> anyhow::Result<()> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(());
        }
        let _lock = self.lock(true)?;
        fs::remove_file(&path)?;
        Ok(())
    }

    /// Non-blocking lock on `.review.lock`, held for the whole request.
    fn try_lock_request(&self) -> anyhow::Result<Option<RequestLock>> {
        self.ensure_dir()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(".review.lock"))?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(RequestLock {
                held: HeldLock::File(file),
            })),
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Write content atomically by writing to a temp file first, then renaming.
///
/// On Windows `rename()` refuses to replace an existing file, so the old file
/// is moved to `.bak` first. That path is not truly atomic; a crash in between
/// leaves the `.bak` for recovery and loses at most the latest write.
fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600));
    }

    #[cfg(windows)]
    {
        let backup_path = path.with_extension("bak");
        if backup_path.exists() {
            let _ = fs::remove_file(&backup_path);
        }
        if path.exists() {
            if let Err(err) = fs::rename(path, &backup_path) {
                let _ = fs::remove_file(&tmp_path);
                return Err(err.into());
            }
        }
        if let Err(err) = fs::rename(&tmp_path, path) {
            if backup_path.exists() {
                let _ = fs::rename(&backup_path, path);
            }
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        if backup_path.exists() {
            let _ = fs::remove_file(&backup_path);
        }
        return Ok(());
    }

    #[cfg(not(windows))]
    {
        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  MEMORY STORE - in-process, for tests and ephemeral sessions
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, String>>,
    writes: Mutex<HashMap<StoreKey, usize>>,
    fail_writes: AtomicBool,
    request_held: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (reads keep working).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: StoreKey) -> bool {
        self.guard().contains_key(&key)
    }

    /// Successful writes to `key` so far.
    pub fn writes(&self, key: StoreKey) -> usize {
        let counts = match self.writes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counts.get(&key).copied().unwrap_or(0)
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<StoreKey, String>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl KvStore for MemoryStore {
    fn read(&self, key: StoreKey) -> anyhow::Result<Option<String>> {
        Ok(self.guard().get(&key).cloned())
    }

    fn write(&self, key: StoreKey, json: &str) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("write to '{}' rejected", key.as_str()));
        }
        self.guard().insert(key, json.to_string());
        let mut counts = match self.writes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *counts.entry(key).or_insert(0) += 1;
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> anyhow::Result<()> {
        self.guard().remove(&key);
        Ok(())
    }

    fn try_lock_request(&self) -> anyhow::Result<Option<RequestLock>> {
        if self.request_held.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(RequestLock {
            held: HeldLock::Flag(self.request_held.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn store_keys_are_unique() {
        let mut names: Vec<&str> = StoreKey::all().iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), StoreKey::all().len());
    }

    #[test]
    fn missing_key_loads_default() {
        let store = MemoryStore::new();
        let value: BTreeMap<String, String> = load_or_default(&store, StoreKey::LanguagePrompts);
        assert!(value.is_empty());
        assert!(load::<String>(&store, StoreKey::Language).is_none());
    }

    #[test]
    fn unreadable_value_loads_default() {
        let store = MemoryStore::new();
        store.write(StoreKey::LeftPercent, "\"not a number\"").unwrap();
        let value: f64 = load_or_default(&store, StoreKey::LeftPercent);
        assert_eq!(value, 0.0);
    }

    #[test]
    fn failing_memory_store_keeps_previous_value() {
        let store = MemoryStore::new();
        save_json(&store, StoreKey::Language, "python").unwrap();
        store.set_fail_writes(true);
        assert!(save_json(&store, StoreKey::Language, "java").is_err());
        assert_eq!(load::<String>(&store, StoreKey::Language).as_deref(), Some("python"));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state"));

        assert!(store.read(StoreKey::Documents).unwrap().is_none());

        let mut docs = BTreeMap::new();
        docs.insert("python".to_string(), "print(1)".to_string());
        save_json(&store, StoreKey::Documents, &docs).unwrap();

        let loaded: BTreeMap<String, String> = load_or_default(&store, StoreKey::Documents);
        assert_eq!(loaded, docs);
        assert!(dir.path().join("state").join("documents.json").exists());
        assert!(!dir.path().join("state").join("documents.tmp").exists());
    }

    #[test]
    fn file_store_keys_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        save_json(&store, StoreKey::Theme, "light").unwrap();
        save_json(&store, StoreKey::Model, "gemini.gemini-1.5-flash").unwrap();
        store.remove(StoreKey::Theme).unwrap();

        assert!(load::<String>(&store, StoreKey::Theme).is_none());
        assert_eq!(
            load::<String>(&store, StoreKey::Model).as_deref(),
            Some("gemini.gemini-1.5-flash")
        );
        // Removing twice is fine.
        store.remove(StoreKey::Theme).unwrap();
    }

    #[test]
    fn file_store_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        save_json(&store, StoreKey::LeftPercent, &40.0).unwrap();
        save_json(&store, StoreKey::LeftPercent, &60.0).unwrap();
        let value: f64 = load_or_default(&store, StoreKey::LeftPercent);
        assert_eq!(value, 60.0);
    }

    #[test]
    fn request_lock_spans_file_stores_on_one_directory() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileStore::new(dir.path().join("state"));
        let second = FileStore::new(dir.path().join("state"));

        let held = first.try_lock_request().unwrap();
        assert!(held.is_some());
        assert!(second.try_lock_request().unwrap().is_none());

        drop(held);
        assert!(second.try_lock_request().unwrap().is_some());
    }

    #[test]
    fn memory_request_lock_is_released_on_drop() {
        let store = MemoryStore::new();
        let held = store.try_lock_request().unwrap();
        assert!(held.is_some());
        assert!(store.try_lock_request().unwrap().is_none());
        drop(held);
        assert!(store.try_lock_request().unwrap().is_some());
    }

    #[test]
    fn memory_store_counts_successful_writes() {
        let store = MemoryStore::new();
        save_json(&store, StoreKey::Theme, "dark").unwrap();
        save_json(&store, StoreKey::Theme, "light").unwrap();
        store.set_fail_writes(true);
        assert!(save_json(&store, StoreKey::Theme, "dark").is_err());
        assert_eq!(store.writes(StoreKey::Theme), 2);
        assert_eq!(store.writes(StoreKey::Model), 0);
    }
}
