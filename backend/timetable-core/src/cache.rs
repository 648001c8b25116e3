// src/cache.rs
//
// On-disk cache for reference data (class, teacher, room and year lists).
// Schedules and substitutions are never cached: they change under the workflow.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use crate::error::{io_context, ApiError};

const MAX_KEY_LEN: usize = 100;

fn now_unix_secs() -> Result<u64, ApiError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| ApiError::Cache(format!("system clock before UNIX epoch: {}", e)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
    last_updated_unix_secs: u64,
    resource_type: String,
    query_params: BTreeMap<String, String>,
}

impl CacheMetadata {
    fn is_stale(&self, max_age_secs: u64) -> Result<bool, ApiError> {
        let age = now_unix_secs()?.saturating_sub(self.last_updated_unix_secs);
        Ok(age > max_age_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedData<T> {
    metadata: CacheMetadata,
    data: T,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    max_age_secs: u64,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, max_age_secs: u64) -> Result<Self, ApiError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                io_context(e, format!("Failed to create cache directory: {:?}", dir))
            })?;
        }
        Ok(Self { dir, max_age_secs })
    }

    /// File-name safe key; long keys keep a prefix plus a SHA-256 digest.
    pub fn cache_key(resource_type: &str, query_params: &BTreeMap<String, String>) -> String {
        let sanitize = |s: &str| s.replace(|c: char| !c.is_alphanumeric(), "_");
        let mut key = sanitize(resource_type);

        if !query_params.is_empty() {
            key.push_str("__PARAMS_");
            for (k, v) in query_params {
                key.push_str(&sanitize(k));
                key.push('_');
                key.push_str(&sanitize(v));
                key.push(';');
            }
        }

        if key.len() > MAX_KEY_LEN {
            let mut hasher = Sha256::new();
            hasher.update(key.as_bytes());
            let hash = hasher.finalize();
            key = format!("{}_{}", &key[..MAX_KEY_LEN / 2], hex::encode(&hash[..8]));
        }
        key
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn save<T: Serialize>(
        &self,
        resource_type: &str,
        query_params: &BTreeMap<String, String>,
        data: &T,
    ) -> Result<(), ApiError> {
        let key = Self::cache_key(resource_type, query_params);
        let path = self.path_for(&key);
        let cached = CachedData {
            metadata: CacheMetadata {
                last_updated_unix_secs: now_unix_secs()?,
                resource_type: resource_type.to_string(),
                query_params: query_params.clone(),
            },
            data,
        };
        let json = serde_json::to_string_pretty(&cached)?;
        fs::write(&path, json)
            .map_err(|e| io_context(e, format!("Failed to write cache file: {:?}", path)))?;
        debug!("Saved data to cache for key: {}", key);
        Ok(())
    }

    /// `Ok(None)` on a miss, a stale entry, or a corrupt file (which is removed).
    pub fn load<T: DeserializeOwned>(
        &self,
        resource_type: &str,
        query_params: &BTreeMap<String, String>,
    ) -> Result<Option<T>, ApiError> {
        let key = Self::cache_key(resource_type, query_params);
        let path = self.path_for(&key);
        if !path.exists() {
            debug!("Cache miss for key: {}", key);
            return Ok(None);
        }

        let json = fs::read_to_string(&path)
            .map_err(|e| io_context(e, format!("Failed to read cache file: {:?}", path)))?;
        let cached: CachedData<T> = match serde_json::from_str(&json) {
            Ok(data) => data,
            Err(e) => {
                warn!("Removing corrupt cache file {:?}: {}", path, e);
                if let Err(remove_err) = fs::remove_file(&path) {
                    error!("Failed to remove corrupt cache file {:?}: {}", path, remove_err);
                }
                return Ok(None);
            }
        };

        if cached.metadata.is_stale(self.max_age_secs)? {
            debug!("Cache stale for key: {}", key);
            return Ok(None);
        }
        debug!("Cache hit for key: {}", key);
        Ok(Some(cached.data))
    }

    /// Removes cached files for one resource type, or everything when `None`.
    pub fn clear(&self, resource_type: Option<&str>) -> Result<usize, ApiError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let prefix = resource_type.map(|r| Self::cache_key(r, &BTreeMap::new()));
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| io_context(e, format!("Failed to read cache directory: {:?}", self.dir)))?;

        let mut removed = 0;
        for entry in entries {
            let path = entry
                .map_err(|e| io_context(e, "Failed to read directory entry"))?
                .path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let matches_prefix = prefix.as_deref().map_or(true, |p| name.starts_with(p));
            if path.is_file() && name.ends_with(".json") && matches_prefix {
                fs::remove_file(&path)
                    .map_err(|e| io_context(e, format!("Failed to remove cache file: {:?}", path)))?;
                removed += 1;
            }
        }
        info!("Cleared {} cache file(s) in {:?}", removed, self.dir);
        Ok(removed)
    }
}
