//! Persistent table store shared by all policy modules.
//!
//! # Data Flow
//! ```text
//! table file (JSON: { table_name: [record, ...] })
//!     → ConfigStore::open (parse once)
//!     → ArcSwap<Tables> snapshot (lock-free reads)
//!
//! On mutation:
//!     writer lock → clone snapshot → apply change
//!     → write temp file + fsync + rename
//!     → swap snapshot
//! ```
//!
//! # Design Decisions
//! - Writers are serialized; readers never block on disk
//! - The snapshot is only swapped after the durable write succeeded
//! - Queries return empty vectors, never absent values

pub mod records;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub use records::{ApprovedDomain, ContentRule, ModuleOrdering, UserRecord};

/// Table names.
pub const APPROVED_DOMAINS: &str = "approved_domains";
pub const CONTENTS: &str = "contents";
pub const PLUGINS: &str = "plugins";
pub const USERS: &str = "users";

/// A flat record.
pub type Record = Map<String, Value>;

type Tables = BTreeMap<String, Vec<Record>>;

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table file I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("table file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("record for table '{0}' is not a JSON object")]
    NotARecord(String),

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON-file backed table store.
pub struct ConfigStore {
    path: PathBuf,
    tables: ArcSwap<Tables>,
    writer: Mutex<()>,
}

impl ConfigStore {
    /// Opens (or creates) the table file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tables = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Tables::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::new(),
            Err(e) => return Err(io_err(e)),
        };

        let store = Self {
            path,
            tables: ArcSwap::from_pointee(tables),
            writer: Mutex::new(()),
        };
        store.persist(&store.tables.load())?;

        tracing::info!(
            path = %store.path.display(),
            tables = store.tables.load().len(),
            "Table store opened"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record to `table`.
    pub fn insert(&self, table: &str, record: impl Serialize) -> Result<(), StoreError> {
        let record = to_record(table, record)?;
        self.mutate(|tables| {
            tables.entry(table.to_string()).or_default().push(record);
        })
    }

    /// Records of `table` whose field `key` equals `value`.
    pub fn search(&self, table: &str, key: &str, value: &Value) -> Vec<Record> {
        self.tables
            .load()
            .get(table)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.get(key) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merges `patch` into every record whose field `key` equals `value`.
    /// Returns the number of updated records.
    pub fn update(
        &self,
        table: &str,
        patch: impl Serialize,
        key: &str,
        value: &Value,
    ) -> Result<usize, StoreError> {
        let patch = to_record(table, patch)?;
        self.mutate(|tables| {
            let mut updated = 0;
            if let Some(records) = tables.get_mut(table) {
                for record in records.iter_mut().filter(|r| r.get(key) == Some(value)) {
                    for (k, v) in &patch {
                        record.insert(k.clone(), v.clone());
                    }
                    updated += 1;
                }
            }
            updated
        })
    }

    /// Deletes every record whose field `key` equals `value`.
    /// Returns the number of removed records.
    pub fn remove(&self, table: &str, key: &str, value: &Value) -> Result<usize, StoreError> {
        self.mutate(|tables| {
            let Some(records) = tables.get_mut(table) else {
                return 0;
            };
            let before = records.len();
            records.retain(|r| r.get(key) != Some(value));
            before - records.len()
        })
    }

    /// Replaces the full content of `table`.
    pub fn replace_all<T: Serialize>(&self, table: &str, records: &[T]) -> Result<(), StoreError> {
        let records = records
            .iter()
            .map(|r| to_record(table, r))
            .collect::<Result<Vec<_>, _>>()?;
        self.mutate(|tables| {
            tables.insert(table.to_string(), records);
        })
    }

    pub fn fetch_all(&self, table: &str) -> Vec<Record> {
        self.tables.load().get(table).cloned().unwrap_or_default()
    }

    /// Typed variant of [`fetch_all`](Self::fetch_all).
    pub fn fetch_all_as<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, StoreError> {
        self.fetch_all(table)
            .into_iter()
            .map(|r| serde_json::from_value(Value::Object(r)).map_err(StoreError::from))
            .collect()
    }

    /// Typed variant of [`search`](Self::search).
    pub fn search_as<T: DeserializeOwned>(
        &self,
        table: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<T>, StoreError> {
        self.search(table, key, value)
            .into_iter()
            .map(|r| serde_json::from_value(Value::Object(r)).map_err(StoreError::from))
            .collect()
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> Result<R, StoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = Tables::clone(&self.tables.load());
        let result = f(&mut next);
        self.persist(&next)?;
        self.tables.store(Arc::new(next));
        Ok(result)
    }

    fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let data = serde_json::to_vec_pretty(tables)?;

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&data).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

fn to_record(table: &str, value: impl Serialize) -> Result<Record, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotARecord(table.to_string())),
    }
}
