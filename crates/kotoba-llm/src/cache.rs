//! Two-layer response cache for the local model client.
//!
//! Layer 1 is an in-memory map; layer 2 is one JSON file per entry in the
//! cache directory. Lookups check memory first, then disk (promoting disk
//! hits back into memory). Expired entries are treated as absent and
//! removed on access.
//!
//! Bounds: when the memory layer exceeds `max_entries` the oldest third
//! is evicted; when the disk layer exceeds `max_bytes` files are removed
//! oldest-first until the total is at most 80% of the limit. Concurrent
//! misses may duplicate work but never corrupt the cache.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Cache tuning knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether the cache is active at all.
    pub enabled: bool,
    /// Directory holding one JSON file per entry.
    pub dir: PathBuf,
    /// Entries older than this are treated as absent.
    pub ttl: Duration,
    /// Memory-layer entry bound.
    pub max_entries: usize,
    /// Disk-layer byte bound.
    pub max_bytes: u64,
}

impl CacheConfig {
    /// Build from the local-model configuration section.
    pub fn from_model_config(cfg: &kotoba_types::config::LocalModelConfig) -> Self {
        Self {
            enabled: cfg.cache_enabled,
            dir: expand_home(&cfg.cache_dir),
            ttl: Duration::from_secs(cfg.cache_ttl_s),
            max_entries: cfg.max_cache_entries,
            max_bytes: cfg.max_cache_bytes,
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Counters exposed through `cache_info()`. Never affect correctness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total lookups answered from either layer.
    pub hits: u64,
    /// Total lookups answered by neither layer.
    pub misses: u64,
    /// Hits answered from the memory layer.
    pub memory_hits: u64,
    /// Hits answered from the disk layer.
    pub disk_hits: u64,
    /// Generate calls that reached the model API.
    pub api_calls: u64,
    /// Current memory-layer entry count.
    pub entries: u64,
    /// Tracked disk-layer size in bytes.
    pub bytes: u64,
}

/// On-disk entry format: `<key>.json`.
#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    response: String,
    model: String,
    timestamp: i64,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    response: String,
    created_at: i64,
}

#[derive(Debug, Default)]
struct CacheInner {
    map: HashMap<String, MemoryEntry>,
    stats: CacheStats,
}

/// The two-layer response cache.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl ResponseCache {
    /// Create a cache, creating the disk directory when enabled.
    pub fn new(config: CacheConfig) -> std::io::Result<Self> {
        if config.enabled {
            fs::create_dir_all(&config.dir)?;
        }
        Ok(Self {
            config,
            inner: Mutex::new(CacheInner::default()),
        })
    }

    /// Whether the cache is active.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Cache key for a request: `sha256(input | request_type | model)`.
    pub fn cache_key(player_input: &str, request_type: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(player_input.as_bytes());
        hasher.update(b"|");
        hasher.update(request_type.as_bytes());
        hasher.update(b"|");
        hasher.update(model.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    /// Look up a response by key. Memory first, then disk (promoting).
    pub fn lookup(&self, key: &str) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        let now = now_unix();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = inner.map.get(key) {
            if self.expired(entry.created_at, now) {
                inner.map.remove(key);
                inner.stats.entries = inner.map.len() as u64;
            } else {
                inner.stats.hits += 1;
                inner.stats.memory_hits += 1;
                return Some(inner.map[key].response.clone());
            }
        }

        if let Some(response) = self.read_disk_entry(key, now) {
            inner.map.insert(
                key.to_string(),
                MemoryEntry {
                    response: response.clone(),
                    created_at: now,
                },
            );
            inner.stats.entries = inner.map.len() as u64;
            inner.stats.hits += 1;
            inner.stats.disk_hits += 1;
            return Some(response);
        }

        inner.stats.misses += 1;
        None
    }

    /// Store a response in both layers, then enforce the bounds.
    ///
    /// Storing the same key again overwrites the previous entry.
    pub fn store(&self, key: &str, response: &str, model: &str) {
        if !self.config.enabled {
            return;
        }
        let now = now_unix();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        inner.map.insert(
            key.to_string(),
            MemoryEntry {
                response: response.to_string(),
                created_at: now,
            },
        );

        let entry = DiskEntry {
            key: key.to_string(),
            response: response.to_string(),
            model: model.to_string(),
            timestamp: now,
        };
        let path = self.entry_path(key);
        let previous_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        match serde_json::to_vec(&entry).map(|bytes| {
            let len = bytes.len() as u64;
            fs::write(&path, bytes).map(|_| len)
        }) {
            Ok(Ok(len)) => {
                inner.stats.bytes = inner.stats.bytes.saturating_sub(previous_size) + len;
            }
            Ok(Err(e)) => warn!(key, error = %e, "failed to write cache file"),
            Err(e) => warn!(key, error = %e, "failed to serialize cache entry"),
        }

        inner.stats.entries = inner.map.len() as u64;
        self.enforce_entry_bound(&mut inner);
        self.enforce_size_bound(&mut inner);
    }

    /// Record that a generate call reached the model API.
    pub fn record_api_call(&self) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.stats.api_calls += 1;
    }

    /// Drop every entry from both layers and reset the counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.clear();
        inner.stats = CacheStats::default();
        if self.config.enabled {
            for path in self.disk_files() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove cache file");
                }
            }
        }
        debug!("cache cleared");
    }

    /// Remove entries older than `max_age` (defaults to the TTL).
    pub fn prune(&self, max_age: Option<Duration>) {
        if !self.config.enabled {
            return;
        }
        let max_age = max_age.unwrap_or(self.config.ttl).as_secs() as i64;
        let now = now_unix();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        inner.map.retain(|_, entry| now - entry.created_at <= max_age);

        for path in self.disk_files() {
            let stale = fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<DiskEntry>(&raw).ok())
                .map(|entry| now - entry.timestamp > max_age)
                .unwrap_or(true);
            if stale {
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if fs::remove_file(&path).is_ok() {
                    inner.stats.bytes = inner.stats.bytes.saturating_sub(size);
                }
            }
        }
        inner.stats.entries = inner.map.len() as u64;
    }

    /// Snapshot of the counters.
    pub fn info(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.stats.clone()
    }

    fn expired(&self, created_at: i64, now: i64) -> bool {
        now - created_at > self.config.ttl.as_secs() as i64
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.config.dir.join(format!("{key}.json"))
    }

    fn read_disk_entry(&self, key: &str, now: i64) -> Option<String> {
        let path = self.entry_path(key);
        let raw = fs::read_to_string(&path).ok()?;
        let entry: DiskEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "malformed cache file, removing");
                let _ = fs::remove_file(&path);
                return None;
            }
        };
        if now - entry.timestamp > self.config.ttl.as_secs() as i64 {
            debug!(key, "cache entry expired");
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(entry.response)
    }

    /// Evict the oldest third of the memory layer once it grows past the
    /// entry bound. Their disk files go too.
    fn enforce_entry_bound(&self, inner: &mut CacheInner) {
        if inner.map.len() <= self.config.max_entries {
            return;
        }
        let mut by_age: Vec<(String, i64)> = inner
            .map
            .iter()
            .map(|(k, v)| (k.clone(), v.created_at))
            .collect();
        by_age.sort_by_key(|(_, created)| *created);

        let to_remove = (by_age.len() / 3).max(1);
        for (key, _) in by_age.into_iter().take(to_remove) {
            inner.map.remove(&key);
            let path = self.entry_path(&key);
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if fs::remove_file(&path).is_ok() {
                inner.stats.bytes = inner.stats.bytes.saturating_sub(size);
            }
        }
        inner.stats.entries = inner.map.len() as u64;
        debug!(removed = to_remove, "evicted oldest cache entries");
    }

    /// Remove disk files oldest-first until the total size is at most
    /// 80% of the byte bound.
    fn enforce_size_bound(&self, inner: &mut CacheInner) {
        if inner.stats.bytes <= self.config.max_bytes {
            return;
        }
        let mut files: Vec<(PathBuf, u64, std::time::SystemTime)> = self
            .disk_files()
            .into_iter()
            .filter_map(|path| {
                let meta = fs::metadata(&path).ok()?;
                let mtime = meta.modified().ok()?;
                Some((path, meta.len(), mtime))
            })
            .collect();
        files.sort_by_key(|(_, _, mtime)| *mtime);

        let target = (self.config.max_bytes as f64 * 0.8) as u64;
        let mut current: u64 = files.iter().map(|(_, size, _)| size).sum();

        for (path, size, _) in files {
            if current <= target {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                current -= size;
                if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                    inner.map.remove(key);
                }
            }
        }
        inner.stats.bytes = current;
        inner.stats.entries = inner.map.len() as u64;
        debug!(bytes = current, "pruned cache to size target");
    }

    fn disk_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.config.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect()
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
