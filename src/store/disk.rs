//! Persistent cache storage on the local file system.
//!
//! Layout under the storage root:
//!
//! ```text
//! <sha256(cache name)>/
//!     cache.toml                  name of the cache
//!     entries/<sha256(key)>.body  response body
//!     entries/<sha256(key)>.toml  status, headers, vary, timestamps
//! ```
//!
//! Files are written to a `.tmp` sibling and renamed into place. The `.toml`
//! metadata is renamed last, so an entry exists exactly when its metadata
//! does.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use super::{CacheEntry, CacheStorage, CacheStore, ensure_storable};
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;

const CACHE_META: &str = "cache.toml";
const ENTRIES_DIR: &str = "entries";

fn digest(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct VaryHeader {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    seq: u64,
    stored_at: DateTime<Utc>,
    headers: Vec<(String, String)>,
    vary: Vec<VaryHeader>,
}

impl EntryMeta {
    fn from_entry(entry: &CacheEntry) -> Self {
        let headers = entry
            .response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let vary = entry
            .vary
            .iter()
            .map(|(name, value)| VaryHeader {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        Self {
            key: entry.key.clone(),
            status: entry.response.status().as_u16(),
            seq: entry.seq,
            stored_at: entry.stored_at,
            headers,
            vary,
        }
    }

    fn into_entry(self, body: Bytes) -> Result<CacheEntry> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| Error::Serialization(format!("{}: {e}", self.key)))?;
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Serialization(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| Error::Serialization(format!("header {name}: {e}")))?;
            headers.append(name, value);
        }
        Ok(CacheEntry {
            key: self.key,
            vary: self.vary.into_iter().map(|v| (v.name, v.value)).collect(),
            response: Response::new(status, headers, body),
            stored_at: self.stored_at,
            seq: self.seq,
        })
    }
}

/// A cache persisted in its own directory.
#[derive(Debug)]
pub struct DiskStore {
    name: String,
    entries_dir: PathBuf,
    lock: RwLock<()>,
    next_seq: AtomicU64,
}

impl DiskStore {
    /// Opens (creating if needed) the cache rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or its existing
    /// entries cannot be read.
    pub async fn open(name: &str, dir: &Path) -> Result<Self> {
        let entries_dir = dir.join(ENTRIES_DIR);
        tokio::fs::create_dir_all(&entries_dir).await?;

        let meta_path = dir.join(CACHE_META);
        if !tokio::fs::try_exists(&meta_path).await? {
            let meta = toml::to_string(&CacheMeta {
                name: name.to_string(),
            })?;
            write_atomic(&meta_path, meta.as_bytes()).await?;
        }

        let store = Self {
            name: name.to_string(),
            entries_dir,
            lock: RwLock::new(()),
            next_seq: AtomicU64::new(0),
        };
        let next = store
            .read_all_meta()
            .await?
            .iter()
            .map(|(_, meta)| meta.seq + 1)
            .max()
            .unwrap_or(0);
        store.next_seq.store(next, Ordering::Relaxed);
        Ok(store)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.entries_dir.join(format!("{}.toml", digest(key)))
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.entries_dir.join(format!("{}.body", digest(key)))
    }

    async fn read_meta(path: &Path) -> Result<Option<EntryMeta>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(toml::from_str(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads every entry's metadata along with its metadata path.
    async fn read_all_meta(&self) -> Result<Vec<(PathBuf, EntryMeta)>> {
        let mut metas = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.entries_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                match Self::read_meta(&path).await {
                    Ok(Some(meta)) => metas.push((path, meta)),
                    Ok(None) => {}
                    Err(e) => log::warn!("Skipping unreadable entry {}: {e}", path.display()),
                }
            }
        }
        metas.sort_by_key(|(_, meta)| meta.seq);
        Ok(metas)
    }

    async fn remove_files(meta_path: &Path) -> Result<()> {
        for path in [meta_path.to_path_buf(), meta_path.with_extension("body")] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        let _guard = self.lock.read().await;
        let key = request.cache_key();
        let meta_path = self.meta_path(&key);
        let meta = match Self::read_meta(&meta_path).await {
            Ok(Some(meta)) => meta,
            Ok(None) => return Ok(None),
            Err(e) => {
                log::warn!("Skipping unreadable entry {}: {e}", meta_path.display());
                return Ok(None);
            }
        };
        let body = match tokio::fs::read(self.body_path(&key)).await {
            Ok(body) => Bytes::from(body),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("Cache {}: body missing for {key}", self.name);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match meta.into_entry(body) {
            Ok(entry) => Ok(entry.matches(request).then_some(entry.response)),
            Err(e) => {
                log::warn!("Skipping unreadable entry {}: {e}", meta_path.display());
                Ok(None)
            }
        }
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        ensure_storable(request)?;
        let _guard = self.lock.write().await;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = CacheEntry::new(request, response, seq);
        let meta = toml::to_string(&EntryMeta::from_entry(&entry))?;

        write_atomic(&self.body_path(&entry.key), entry.response.body()).await?;
        write_atomic(&self.meta_path(&entry.key), meta.as_bytes()).await?;
        Ok(())
    }

    async fn delete(&self, request: &Request) -> Result<bool> {
        let _guard = self.lock.write().await;
        let meta_path = self.meta_path(&request.cache_key());
        let existed = tokio::fs::try_exists(&meta_path).await?;
        Self::remove_files(&meta_path).await?;
        Ok(existed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.lock.read().await;
        Ok(self
            .read_all_meta()
            .await?
            .into_iter()
            .map(|(_, meta)| meta.key)
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        let _guard = self.lock.read().await;
        Ok(self.read_all_meta().await?.len())
    }

    async fn trim(&self, max_entries: usize) -> Result<usize> {
        let _guard = self.lock.write().await;
        let metas = self.read_all_meta().await?;
        let excess = metas.len().saturating_sub(max_entries);
        for (path, _) in metas.iter().take(excess) {
            Self::remove_files(path).await?;
        }
        Ok(excess)
    }
}

/// Named caches persisted under a root directory.
#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
    open: Mutex<HashMap<String, Arc<DiskStore>>>,
}

impl DiskStorage {
    /// Creates a storage rooted at `root`. Nothing is touched until a cache
    /// is opened.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, name: &str) -> PathBuf {
        self.root.join(digest(name))
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        let mut open = self.open.lock().await;
        if let Some(store) = open.get(name) {
            return Ok(Arc::clone(store) as Arc<dyn CacheStore>);
        }
        let store = Arc::new(DiskStore::open(name, &self.cache_dir(name)).await?);
        open.insert(name.to_string(), Arc::clone(&store));
        Ok(store as Arc<dyn CacheStore>)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.cache_dir(name).join(CACHE_META)).await?)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut open = self.open.lock().await;
        open.remove(name);
        match tokio::fs::remove_dir_all(self.cache_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(item) = dir.next_entry().await? {
            let meta_path = item.path().join(CACHE_META);
            match tokio::fs::read_to_string(&meta_path).await {
                Ok(contents) => names.push(toml::from_str::<CacheMeta>(&contents)?.name),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        names.sort();
        Ok(names)
    }
}
