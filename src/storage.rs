use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::task::JoinHandle;

use crate::models::random_id;

/// Where a blob lives locally and, when a remote store is configured, remotely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlobKey {
    pub local: &'static str,
    pub remote: Option<&'static str>,
    /// Field of the remote document holding the blob, if it is wrapped.
    pub remote_field: Option<&'static str>,
}

// These names and shapes are shared with existing classroom data.
pub const ROSTER: BlobKey = BlobKey {
    local: "team_data_v3",
    remote: Some("students_list/my_classroom_v3"),
    remote_field: None,
};
pub const PENALTIES: BlobKey = BlobKey {
    local: "penalty_items",
    remote: Some("game_data/penalty_v1"),
    remote_field: Some("items"),
};
pub const TAG_HISTORY: BlobKey = BlobKey {
    local: "tag_history",
    remote: None,
    remote_field: None,
};
pub const RPS_HISTORY: BlobKey = BlobKey {
    local: "rps_history",
    remote: None,
    remote_field: None,
};

pub trait DocumentStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>>;

    fn save(&self, key: &str, value: &Value) -> Result<()>;
}

/// One JSON file per key; `/` in a key becomes a subdirectory.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> FileStore {
        FileStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in key.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(anyhow!("bad document key {:?}", key));
            }
            path.push(part);
        }
        path.set_extension("json");
        Ok(path)
    }
}

impl DocumentStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path(key)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension(format!("json.{}.tmp", random_id()));
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }
}

/// Local store of record plus an optional remote copy.
#[derive(Clone)]
pub struct Persistence {
    local: Arc<dyn DocumentStore>,
    remote: Option<Arc<dyn DocumentStore>>,
    /// Newest background save handed out per local key.
    issued: Arc<Mutex<BTreeMap<&'static str, u64>>>,
    /// Held for the whole of a background write.
    writing: Arc<Mutex<()>>,
}

impl Persistence {
    pub fn new(
        local: Arc<dyn DocumentStore>,
        remote: Option<Arc<dyn DocumentStore>>,
    ) -> Persistence {
        Persistence {
            local,
            remote,
            issued: Arc::new(Mutex::new(BTreeMap::new())),
            writing: Arc::new(Mutex::new(())),
        }
    }

    /// Reads the remote copy first and falls back to the local one. Any
    /// failure is logged and treated as a miss.
    pub fn load<T: DeserializeOwned>(&self, key: BlobKey) -> Option<T> {
        if let (Some(remote), Some(remote_key)) = (&self.remote, key.remote) {
            let blob = remote
                .load(remote_key)
                .map(|value| unwrap_field(value, key.remote_field))
                .and_then(decode);
            match blob {
                Ok(Some(blob)) => return Some(blob),
                Ok(None) => {}
                Err(err) => log::warn!("remote load of {} failed: {}", remote_key, err),
            }
        }

        match self.local.load(key.local).and_then(decode) {
            Ok(blob) => blob,
            Err(err) => {
                log::warn!("local load of {} failed: {}", key.local, err);
                None
            }
        }
    }

    /// Writes locally, then remotely. A failed remote write is only logged.
    pub fn save<T: Serialize + ?Sized>(&self, key: BlobKey, blob: &T) -> Result<()> {
        let value = serde_json::to_value(blob)?;
        self.save_value(key, value)
    }

    fn save_value(&self, key: BlobKey, value: Value) -> Result<()> {
        self.local.save(key.local, &value)?;

        if let (Some(remote), Some(remote_key)) = (&self.remote, key.remote) {
            let value = match key.remote_field {
                Some(field) => {
                    let mut document = serde_json::Map::new();
                    document.insert(field.to_string(), value);
                    Value::Object(document)
                }
                None => value,
            };
            if let Err(err) = remote.save(remote_key, &value) {
                log::warn!("remote save of {} failed: {}", remote_key, err);
            }
        }

        Ok(())
    }

    /// Fire-and-forget [`save`](Persistence::save) on the blocking pool.
    ///
    /// Saves of one key land in the order they were issued: a write that
    /// finds a newer save already issued for its key is dropped.
    pub fn save_in_background<T: Serialize + ?Sized>(
        &self,
        key: BlobKey,
        blob: &T,
    ) -> Option<JoinHandle<()>> {
        let value = match serde_json::to_value(blob) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("couldn't encode {}: {}", key.local, err);
                return None;
            }
        };

        let generation = match self.issued.lock() {
            Ok(mut issued) => {
                let generation = issued.entry(key.local).or_insert(0);
                *generation += 1;
                *generation
            }
            Err(_err) => {
                log::warn!("save of {} skipped, issue lock poisoned", key.local);
                return None;
            }
        };

        let persistence = self.clone();
        Some(tokio::task::spawn_blocking(move || {
            let _writing = match persistence.writing.lock() {
                Ok(writing) => writing,
                Err(_err) => {
                    log::warn!("save of {} skipped, write lock poisoned", key.local);
                    return;
                }
            };

            if persistence.newest_issued(key) != Some(generation) {
                log::debug!("dropping stale save of {} #{}", key.local, generation);
                return;
            }

            if let Err(err) = persistence.save_value(key, value) {
                log::warn!("save of {} failed: {}", key.local, err);
            }
        }))
    }

    fn newest_issued(&self, key: BlobKey) -> Option<u64> {
        self.issued
            .lock()
            .ok()
            .and_then(|issued| issued.get(key.local).copied())
    }
}

fn unwrap_field(value: Option<Value>, field: Option<&str>) -> Option<Value> {
    match (value, field) {
        (Some(mut value), Some(field)) => value.get_mut(field).map(Value::take),
        (value, None) => value,
        (None, Some(_)) => None,
    }
}

fn decode<T: DeserializeOwned>(value: Option<Value>) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}
