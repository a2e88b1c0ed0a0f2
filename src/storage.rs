//! Storage collaborators: where processed bytes and result rows go.
//!
//! The pipeline only talks to the [`ObjectStore`] and [`MetadataStore`]
//! traits. A filesystem store and a JSON-lines metadata file ship for the
//! command-line tool; the in-memory variants back tests and dry runs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::error::StoreError;
use crate::image_processing::{ItemStatus, TransformResult};

/// Blob storage for processed images
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Time-limited URL for downloading `key`
    fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StoreError>;
}

/// Durable sink for per-image result rows
pub trait MetadataStore: Send + Sync {
    fn insert_many(&self, records: &[ImageRecord]) -> Result<(), StoreError>;
}

/// Deployment environment, used as the top-level key prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEnv {
    #[default]
    Dev,
    Prod,
}

impl StorageEnv {
    /// `Prod` when `APP_ENV=production`, `Dev` otherwise
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV") {
            Ok(value) if value.eq_ignore_ascii_case("production") => StorageEnv::Prod,
            _ => StorageEnv::Dev,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            StorageEnv::Dev => "dev",
            StorageEnv::Prod => "prod",
        }
    }
}

/// Object key layout for session output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPaths {
    env: StorageEnv,
}

impl SessionPaths {
    pub fn new(env: StorageEnv) -> Self {
        Self { env }
    }

    pub fn session_prefix(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.env.prefix(), session_id)
    }

    /// `{env}/sessions/{session}/processed/{name}`
    pub fn processed_key(&self, session_id: &str, processed_name: &str) -> String {
        format!("{}/processed/{}", self.session_prefix(session_id), processed_name)
    }
}

/// Metadata-store row for one processed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub session_id: String,
    pub original_name: String,
    pub processed_key: Option<String>,
    pub processed_name: Option<String>,
    pub status: ItemStatus,
    pub error_message: Option<String>,
}

impl From<&TransformResult> for ImageRecord {
    fn from(result: &TransformResult) -> Self {
        Self {
            session_id: result.session_id.clone(),
            original_name: result.original_name.clone(),
            processed_key: result.processed_key.clone(),
            processed_name: result.processed_name.clone(),
            status: result.status,
            error_message: result.error_message.clone(),
        }
    }
}

/// One entry handed to the archive packager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub url: String,
    pub name: String,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Hex SHA-256 over secret, key and expiry
pub fn url_signature(secret: &str, key: &str, expires: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"\n");
    hasher.update(key.as_bytes());
    hasher.update(b"\n");
    hasher.update(expires.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check a signature produced by [`url_signature`] and that it has not expired
pub fn verify_url_signature(secret: &str, key: &str, expires: u64, signature: &str) -> bool {
    expires >= unix_now() && url_signature(secret, key, expires) == signature
}

/// Object store rooted in a local directory
pub struct FsObjectStore {
    root: PathBuf,
    secret: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            secret: secret.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path below the root, rejecting traversal
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::Backend(format!("Invalid object key: {:?}", key)));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        debug!(key, bytes = bytes.len(), mime_type, "Stored object");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let path = fs::canonicalize(&path)?;

        let expires = unix_now() + ttl.as_secs();
        let signature = url_signature(&self.secret, key, expires);
        Ok(format!(
            "file://{}?expires={}&signature={}",
            path.display(),
            expires,
            signature
        ))
    }
}

/// In-process object store
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    failing_fragment: Option<String>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every `put` whose key contains `fragment`
    pub fn failing_on(fragment: impl Into<String>) -> Self {
        Self {
            failing_fragment: Some(fragment.into()),
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.objects.lock() {
            Ok(objects) => objects.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }

    pub fn mime_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()?
            .get(key)
            .map(|(_, mime)| mime.clone())
    }

    fn objects(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, String)>>, StoreError> {
        self.objects
            .lock()
            .map_err(|_| StoreError::Backend("object map lock poisoned".to_string()))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<(), StoreError> {
        if let Some(fragment) = &self.failing_fragment {
            if key.contains(fragment.as_str()) {
                return Err(StoreError::Backend(format!("Upload rejected for {}", key)));
            }
        }
        self.objects()?
            .insert(key.to_string(), (bytes.to_vec(), mime_type.to_string()));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects()?
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StoreError> {
        if !self.objects()?.contains_key(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(format!("memory://{}?expires={}", key, unix_now() + ttl.as_secs()))
    }
}

/// Appends one JSON object per line to a file
pub struct JsonLinesMetadataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataStore for JsonLinesMetadataStore {
    fn insert_many(&self, records: &[ImageRecord]) -> Result<(), StoreError> {
        // Serialize everything first so a bad record writes nothing
        let mut lines = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| StoreError::Backend(format!("Failed to encode record: {}", e)))?;
            lines.push_str(&line);
            lines.push('\n');
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Backend("metadata file lock poisoned".to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(lines.as_bytes())?;
        writer.flush()?;

        debug!(path = %self.path.display(), count = records.len(), "Wrote metadata records");
        Ok(())
    }
}

/// In-process metadata store that can be switched into a failing state
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: Mutex<Vec<ImageRecord>>,
    failing: AtomicBool,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<ImageRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn insert_many(&self, records: &[ImageRecord]) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("metadata store unavailable".to_string()));
        }
        self.records
            .lock()
            .map_err(|_| StoreError::Backend("record list lock poisoned".to_string()))?
            .extend_from_slice(records);
        Ok(())
    }
}
