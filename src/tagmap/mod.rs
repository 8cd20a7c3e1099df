use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub mod watcher;

/// Reserved key in the mapping document naming the fallback media file
pub const DEFAULT_KEY: &str = "default";

/// Errors raised while reading the tag map document
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read tag map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse tag map {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Tag map {path} must be a JSON object")]
    NotAnObject { path: PathBuf },
}

/// Normalizes a raw tag id read from a reader or sent by a client
pub fn normalize_tag_id(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Immutable tag id to filename mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    entries: HashMap<String, String>,
    default: Option<String>,
}

impl TagMap {
    /// Build a map from raw `(key, filename)` pairs, normalizing tag ids
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map = TagMap::default();
        for (key, filename) in pairs {
            let key = key.as_ref();
            if key.trim().eq_ignore_ascii_case(DEFAULT_KEY) {
                map.default = Some(filename.into());
            } else {
                map.entries.insert(normalize_tag_id(key), filename.into());
            }
        }
        map
    }

    /// Read and parse the mapping document at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let document: Value =
            serde_json::from_str(&content).map_err(|source| ConfigLoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let Value::Object(object) = document else {
            return Err(ConfigLoadError::NotAnObject {
                path: path.to_path_buf(),
            });
        };

        let pairs = object.into_iter().filter_map(|(key, value)| match value {
            Value::String(filename) => Some((key, filename)),
            other => {
                warn!(key = %key, "Ignoring non-string tag map value: {}", other);
                None
            }
        });

        let map = Self::from_pairs(pairs);
        if map.default.is_none() {
            warn!(path = %path.display(), "No '{}' key found in tag map", DEFAULT_KEY);
        }
        Ok(map)
    }

    /// Like [`TagMap::load`], but falls back to an empty map on failure
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(map) => map,
            Err(e) => {
                error!("{}; continuing with an empty tag map", e);
                Self::default()
            }
        }
    }

    pub fn lookup(&self, tag_id: &str) -> Option<&str> {
        self.entries.get(&normalize_tag_id(tag_id)).map(String::as_str)
    }

    pub fn default_filename(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Number of tag entries, not counting the default
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.default.is_none()
    }

    /// The mapping as a document, including the reserved default key
    pub fn to_document(&self) -> BTreeMap<String, String> {
        let mut document: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|(tag, filename)| (tag.clone(), filename.clone()))
            .collect();
        if let Some(default) = &self.default {
            document.insert(DEFAULT_KEY.to_string(), default.clone());
        }
        document
    }
}

/// Shared owner of the current [`TagMap`].
///
/// Consumers take an `Arc` snapshot; reload swaps the whole `Arc` under a
/// single write lock.
pub struct TagMapStore {
    path: PathBuf,
    current: RwLock<Arc<TagMap>>,
    last_error: Mutex<Option<String>>,
}

impl TagMapStore {
    /// Load the map at `path` (empty on failure) and wrap it in a store
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::with_map(&path, TagMap::default());
        let map = store.settle(TagMap::load(&path));
        info!(path = %path.display(), entries = map.len(), "Loaded tag map");
        *store.current.get_mut() = Arc::new(map);
        store
    }

    /// Store with an already built map, reloading from `path` later
    pub fn with_map<P: AsRef<Path>>(path: P, map: TagMap) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            current: RwLock::new(Arc::new(map)),
            last_error: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> Arc<TagMap> {
        self.current.read().await.clone()
    }

    /// Message of the most recent failed load, cleared by a successful one
    pub fn last_load_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }

    /// Re-read the mapping document and replace the current map
    pub async fn reload(&self) -> Arc<TagMap> {
        let path = self.path.clone();
        let map = match tokio::task::spawn_blocking(move || TagMap::load(&path)).await {
            Ok(result) => self.settle(result),
            Err(e) => {
                error!("Tag map reload task failed: {}", e);
                TagMap::default()
            }
        };
        let map = Arc::new(map);

        let previous = {
            let mut guard = self.current.write().await;
            std::mem::replace(&mut *guard, map.clone())
        };

        if *previous != *map {
            info!(path = %self.path.display(), entries = map.len(), "Tag map changed on reload");
        } else {
            debug!(path = %self.path.display(), "Tag map reloaded without changes");
        }
        map
    }

    /// Fall back to an empty map on failure. Only the first occurrence of
    /// an error is logged loudly; repeats of the same message go to debug.
    fn settle(&self, result: Result<TagMap, ConfigLoadError>) -> TagMap {
        let Ok(mut last_error) = self.last_error.lock() else {
            return result.unwrap_or_default();
        };
        match result {
            Ok(map) => {
                if last_error.take().is_some() {
                    info!(path = %self.path.display(), "Tag map readable again");
                }
                map
            }
            Err(e) => {
                let message = e.to_string();
                if last_error.as_deref() == Some(message.as_str()) {
                    debug!("{}; still using an empty tag map", message);
                } else {
                    error!("{}; continuing with an empty tag map", message);
                    *last_error = Some(message);
                }
                TagMap::default()
            }
        }
    }
}
