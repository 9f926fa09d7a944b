//! Configuration types for the cache worker and its proxy host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::request::parse_url;

/// Assets precached by default: the application shell, its manifest, icons
/// and vendored CSS/JS.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "./",
    "./manifest.json",
    "./static/css/materialize.min.css",
    "./static/img/icon-192x192.png",
    "./static/img/icon-256x256.png",
    "./static/img/icon-384x384.png",
    "./static/img/icon-512x512.png",
    "./static/js/jquery-3.5.1.min.js",
    "./static/js/materialize.min.js",
];

/// Cache naming, manifest and strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// The worker's own origin; same-origin requests are served cache-first.
    pub origin: String,
    /// Prefix shared by every cache this worker owns.
    pub prefix: String,
    /// Version tag baked into cache names. Bumping it retires old caches on
    /// the next activation.
    pub version: String,
    /// Resources fetched into the static cache at install time.
    pub manifest: Vec<String>,
    /// Manifest entry served when a network-first request has neither a
    /// network nor a cached response.
    pub offline_fallback: Option<String>,
    /// Upper bound on dynamic cache entries; oldest entries are evicted.
    pub dynamic_max_entries: Option<usize>,
    /// Number of manifest entries fetched concurrently during install.
    pub install_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:9000".to_string(),
            prefix: "precache".to_string(),
            version: "v1".to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(ToString::to_string).collect(),
            offline_fallback: None,
            dynamic_max_entries: None,
            install_concurrency: 4,
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Sets the cache version tag.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replaces the static asset manifest.
    #[must_use]
    pub fn with_manifest<I, S>(mut self, manifest: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = manifest.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the offline fallback asset.
    #[must_use]
    pub fn with_offline_fallback(mut self, entry: impl Into<String>) -> Self {
        self.offline_fallback = Some(entry.into());
        self
    }

    /// Bounds the dynamic cache.
    #[must_use]
    pub const fn with_dynamic_max_entries(mut self, max: usize) -> Self {
        self.dynamic_max_entries = Some(max);
        self
    }

    /// Sets install fetch concurrency.
    #[must_use]
    pub const fn with_install_concurrency(mut self, concurrency: usize) -> Self {
        self.install_concurrency = concurrency;
        self
    }

    /// Name of the static (precache) cache for the current version.
    #[must_use]
    pub fn static_cache_name(&self) -> String {
        format!("{}-static-{}", self.prefix, self.version)
    }

    /// Name of the dynamic (runtime) cache for the current version.
    #[must_use]
    pub fn dynamic_cache_name(&self) -> String {
        format!("{}-dynamic-{}", self.prefix, self.version)
    }

    /// Checks the configuration for values the worker cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let origin = parse_url(&self.origin)
            .map_err(|e| Error::Config(format!("origin: {e}")))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "origin must be http or https, got {}",
                origin.scheme()
            )));
        }
        if self.prefix.is_empty() || self.version.is_empty() {
            return Err(Error::Config("prefix and version must not be empty".into()));
        }
        if self.install_concurrency == 0 {
            return Err(Error::Config("install_concurrency must be at least 1".into()));
        }
        if self.dynamic_max_entries == Some(0) {
            return Err(Error::Config("dynamic_max_entries must be at least 1".into()));
        }
        if let Some(ref fallback) = self.offline_fallback {
            let resolved = origin
                .join(fallback)
                .map_err(|e| Error::Config(format!("offline_fallback {fallback}: {e}")))?;
            let listed = self
                .manifest
                .iter()
                .filter_map(|entry| origin.join(entry).ok())
                .any(|url| url == resolved);
            if !listed {
                return Err(Error::Config(format!(
                    "offline_fallback {fallback} is not in the manifest"
                )));
            }
        }
        Ok(())
    }
}

/// Network fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds. No timeout when unset.
    pub timeout_secs: Option<u64>,
    /// User agent sent with every fetch.
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            user_agent: format!("precache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl NetworkConfig {
    /// Returns the request timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Where cache stores keep their entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Entries live in process memory and vanish on restart.
    Memory,
    /// Entries are written under `cache_dir` and survive restarts.
    #[default]
    Disk,
}

/// Cache storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend.
    pub backend: StorageBackend,
    /// Root directory of the disk backend.
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            backend: StorageBackend::Disk,
            cache_dir: data_dir.join("precache").join("caches"),
        }
    }
}

/// Proxy server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Largest request body forwarded to the network, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9080,
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Complete configuration file: cache, network, storage and proxy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cache settings.
    pub cache: CacheConfig,
    /// Network settings.
    pub network: NetworkConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Proxy settings.
    pub proxy: ProxyConfig,
}

impl WorkerConfig {
    /// Returns the default config file location.
    ///
    /// Uses `PRECACHE_CONFIG` when set, falling back to
    /// `$XDG_CONFIG_HOME/precache/config.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::var_os("PRECACHE_CONFIG").map_or_else(
            || {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("precache")
                    .join("config.toml")
            },
            PathBuf::from,
        )
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.cache.validate()?;
        Ok(config)
    }

    /// Loads the configuration file, writing a default one first if none
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, read or parsed.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("Writing default configuration to {}", path.display());
            Self::default().save(path)?;
        }
        Self::load(path)
    }

    /// Saves the configuration atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, toml::to_string(self)?)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_cache_config() {
        let config = CacheConfig::default();
        assert_eq!(config.manifest.len(), DEFAULT_MANIFEST.len());
        assert_eq!(config.manifest[0], "./");
        assert_eq!(config.install_concurrency, 4);
        assert!(config.offline_fallback.is_none());
        assert!(config.dynamic_max_entries.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn cache_names_are_versioned() {
        let config = CacheConfig::new().with_version("v7");
        assert_eq!(config.static_cache_name(), "precache-static-v7");
        assert_eq!(config.dynamic_cache_name(), "precache-dynamic-v7");
    }

    #[test]
    fn builder_pattern() {
        let config = CacheConfig::new()
            .with_origin("https://qard.example")
            .with_manifest(["/a.css", "/offline.html"])
            .with_offline_fallback("/offline.html")
            .with_dynamic_max_entries(50)
            .with_install_concurrency(2);

        assert_eq!(config.origin, "https://qard.example");
        assert_eq!(config.manifest, vec!["/a.css", "/offline.html"]);
        assert_eq!(config.offline_fallback.as_deref(), Some("/offline.html"));
        assert_eq!(config.dynamic_max_entries, Some(50));
        assert_eq!(config.install_concurrency, 2);
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(CacheConfig::new().with_origin("ftp://x").validate().is_err());
        assert!(CacheConfig::new().with_origin("nope").validate().is_err());
        assert!(CacheConfig::new().with_install_concurrency(0).validate().is_err());
        assert!(CacheConfig::new().with_dynamic_max_entries(0).validate().is_err());
        assert!(
            CacheConfig::new()
                .with_offline_fallback("/missing.html")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn offline_fallback_matches_by_resolved_url() {
        let config = CacheConfig::new()
            .with_origin("http://localhost:9000")
            .with_manifest(["/offline.html"])
            .with_offline_fallback("./offline.html");
        config.validate().unwrap();

        let absolute = config.with_offline_fallback("http://localhost:9000/offline.html");
        absolute.validate().unwrap();
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: WorkerConfig = toml::from_str(
            r#"
            [cache]
            origin = "http://localhost:8000"
            manifest = ["/a.css", "/b.js"]

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.origin, "http://localhost:8000");
        assert_eq!(config.cache.manifest, vec!["/a.css", "/b.js"]);
        assert_eq!(config.cache.prefix, "precache");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.proxy.port, 9080);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = WorkerConfig::default();
        config.cache.version = "v2".to_string();
        config.network.timeout_secs = Some(10);
        config.save(&path).unwrap();

        let loaded = WorkerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.network.timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn load_or_create_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = WorkerConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn load_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\ninstall_concurrency = 0\n").unwrap();
        assert!(matches!(WorkerConfig::load(&path), Err(Error::Config(_))));
    }
}
