use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::core::hanzi::Hanzi;

/// String-keyed, string-valued persistent store shared by every cache in the
/// process. Writes replace the whole value.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn write(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn clear_all(&self) -> Result<()>;
    async fn usage(&self) -> Result<u64>;
}

/// Key namespaces. Each feature caches under its own prefix so entries for the
/// same character never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    StrokeData,
    CharacterDetails,
}

impl CacheNamespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheNamespace::StrokeData => "hanzi_writer_data_v1_",
            CacheNamespace::CharacterDetails => "hanzi_flow_ai_v1_zh_",
        }
    }

    pub fn key(&self, character: Hanzi) -> String {
        format!("{}{}", self.prefix(), character)
    }
}

fn quota_error(key: &str, needed: u64, quota: u64) -> anyhow::Error {
    anyhow::anyhow!(
        "Storage quota exceeded writing {}: {} bytes needed, quota is {} bytes",
        key,
        needed,
        quota
    )
}

// --- Native Implementation ---

const TMP_SUFFIX: &str = ".tmp";

/// One file per key inside `root`. Every write goes to its own temp file
/// and is renamed over the entry, so readers only ever see whole values.
pub struct NativeStorage {
    root: PathBuf,
    quota_bytes: Option<u64>,
    pending: AtomicU64,
}

impl NativeStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota_bytes: None,
            pending: AtomicU64::new(0),
        }
    }

    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(encode_key(key))
    }

    /// Encoded keys never contain '.', so temp names cannot shadow an entry.
    fn temp_path_for(&self, key: &str) -> PathBuf {
        let n = self.pending.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(
            "{}.{}.{}{}",
            encode_key(key),
            std::process::id(),
            n,
            TMP_SUFFIX
        ))
    }

    async fn stored_entries(&self) -> Result<Vec<(String, u64)>> {
        let mut entries = Vec::new();
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(entries);
        }
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to read storage dir {:?}", self.root))?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let Some(key) = decode_key(&name) else {
                continue;
            };
            let len = entry.metadata().await?.len();
            entries.push((key, len));
        }
        Ok(entries)
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {:?}", path)),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        if let Some(quota) = self.quota_bytes {
            let others: u64 = self
                .stored_entries()
                .await?
                .into_iter()
                .filter(|(k, _)| k != key)
                .map(|(_, len)| len)
                .sum();
            let needed = others + value.len() as u64;
            if needed > quota {
                return Err(quota_error(key, needed, quota));
            }
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(key);
        let tmp = self.temp_path_for(key);

        let written = match tokio::fs::write(&tmp, value).await {
            Ok(()) => tokio::fs::rename(&tmp, &path)
                .await
                .with_context(|| format!("Failed to replace {:?}", path)),
            Err(e) => Err(e).with_context(|| format!("Failed to write {:?}", tmp)),
        };
        if written.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        written
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {:?}", path)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .stored_entries()
            .await?
            .into_iter()
            .map(|(k, _)| k)
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear_all(&self) -> Result<()> {
        for (key, _) in self.stored_entries().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    async fn usage(&self) -> Result<u64> {
        Ok(self.stored_entries().await?.iter().map(|(_, len)| len).sum())
    }
}

/// Escapes ASCII characters outside `[A-Za-z0-9_-]` as `%XX`. Non-ASCII
/// characters are kept so cache files stay readable.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii() {
            out.push(c);
        } else {
            out.push_str(&format!("%{:02X}", c as u32));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            let byte = u8::from_str_radix(&hex, 16).ok()?;
            out.push(byte as char);
        } else {
            out.push(c);
        }
    }
    Some(out)
}

// --- In-memory Implementation ---

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock();
        if let Some(quota) = self.quota_bytes {
            let others: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len() as u64)
                .sum();
            let needed = others + value.len() as u64;
            if needed > quota {
                return Err(quota_error(key, needed, quota));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock().contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn clear_all(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }

    async fn usage(&self) -> Result<u64> {
        Ok(self.lock().values().map(|v| v.len() as u64).sum())
    }
}
