use std::path::{Path, PathBuf};

use keeper_core::{InstanceRecord, InstanceStore};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{context} ({path}): {source}")]
    Io {
        context: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("instance list {path} is not valid JSON: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize instance list: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("an instance with id {0} already exists")]
    DuplicateId(Uuid),
}

impl StoreError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.display().to_string(),
            source,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    instances: Vec<InstanceRecord>,
}

/// Instance list kept as pretty JSON, by default `<config_dir>/instances.json`.
#[derive(Debug)]
pub struct JsonInstanceStore {
    path: PathBuf,
    records: Vec<InstanceRecord>,
}

impl JsonInstanceStore {
    /// A missing file is an empty store. A corrupt one is an error so a later
    /// save cannot silently discard it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => {
                serde_json::from_str::<StoreFile>(&content)
                    .map_err(|source| StoreError::Corrupt {
                        path: path.display().to_string(),
                        source,
                    })?
                    .instances
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(StoreError::io("failed to read instance list", &path, error)),
        };
        debug!("Loaded {} instance(s) from {}", records.len(), path.display());
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up by exact id, case-insensitive name, or unique id prefix.
    pub fn find(&self, query: &str) -> Option<&InstanceRecord> {
        if let Ok(id) = Uuid::parse_str(query) {
            return self.instance(id);
        }
        if let Some(record) = self
            .records
            .iter()
            .find(|record| record.name.eq_ignore_ascii_case(query))
        {
            return Some(record);
        }

        let query = query.to_ascii_lowercase();
        let mut matches = self
            .records
            .iter()
            .filter(|record| record.id.to_string().starts_with(&query));
        match (matches.next(), matches.next()) {
            (Some(record), None) if !query.is_empty() => Some(record),
            _ => None,
        }
    }
}

impl InstanceStore for JsonInstanceStore {
    type Error = StoreError;

    fn instances(&self) -> &[InstanceRecord] {
        &self.records
    }

    fn add_instance(&mut self, record: InstanceRecord) -> Result<(), StoreError> {
        if self.instance(record.id).is_some() {
            return Err(StoreError::DuplicateId(record.id));
        }
        if let Some(parent) = record.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                StoreError::io("failed to create instance parent directory", parent, error)
            })?;
        }
        self.records.push(record);
        Ok(())
    }

    fn update_instance(&mut self, record: &InstanceRecord) -> Result<bool, StoreError> {
        match self.records.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => {
                existing.clone_from(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_instance(&mut self, id: Uuid) -> Result<Option<InstanceRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .position(|record| record.id == id)
            .map(|index| self.records.remove(index)))
    }

    fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                StoreError::io("failed to create config directory", parent, error)
            })?;
        }

        let file = StoreFile {
            instances: self.records.clone(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(StoreError::Serialize)?;

        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, content)
            .map_err(|error| StoreError::io("failed to write instance list", &staging, error))?;
        std::fs::rename(&staging, &self.path)
            .map_err(|error| StoreError::io("failed to replace instance list", &self.path, error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keeper_core::{InstanceRecord, InstanceStore};

    use super::{JsonInstanceStore, StoreError};

    #[test]
    fn missing_file_is_empty_store() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let store = JsonInstanceStore::open(temp.path().join("instances.json"))
            .expect("missing file should open");
        assert!(store.instances().is_empty());
    }

    #[test]
    fn records_survive_save_and_reopen() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("config/instances.json");
        let mut store = JsonInstanceStore::open(&path).expect("store should open");

        let mut record = InstanceRecord::new("main", temp.path().join("bots/main"));
        record.auto_start = true;
        store.add_instance(record.clone()).expect("add should succeed");
        record.version = Some("2.3.0".to_string());
        assert!(store.update_instance(&record).expect("update should succeed"));
        store.save().expect("save should succeed");

        assert!(temp.path().join("bots").is_dir());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = JsonInstanceStore::open(&path).expect("store should reopen");
        assert_eq!(reopened.instances(), &[record]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let mut store =
            JsonInstanceStore::open(temp.path().join("instances.json")).expect("store should open");
        let record = InstanceRecord::new("main", temp.path().join("main"));

        store.add_instance(record.clone()).expect("first add succeeds");
        let error = store
            .add_instance(record)
            .expect_err("second add must fail");
        assert!(matches!(error, StoreError::DuplicateId(_)));
    }

    #[test]
    fn remove_and_update_unknown_ids() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let mut store =
            JsonInstanceStore::open(temp.path().join("instances.json")).expect("store should open");
        let record = InstanceRecord::new("main", temp.path().join("main"));

        assert!(!store.update_instance(&record).expect("update should not fail"));
        store.add_instance(record.clone()).expect("add succeeds");

        let removed = store.remove_instance(record.id).expect("remove succeeds");
        assert_eq!(removed, Some(record.clone()));
        assert_eq!(store.remove_instance(record.id).expect("remove succeeds"), None);
    }

    #[test]
    fn find_by_id_name_or_prefix() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let mut store =
            JsonInstanceStore::open(temp.path().join("instances.json")).expect("store should open");
        let main = InstanceRecord::new("Main", temp.path().join("main"));
        let music = InstanceRecord::new("music", temp.path().join("music"));
        store.add_instance(main.clone()).expect("add succeeds");
        store.add_instance(music.clone()).expect("add succeeds");

        assert_eq!(store.find("main").map(|r| r.id), Some(main.id));
        assert_eq!(store.find(&music.id.to_string()).map(|r| r.id), Some(music.id));
        assert_eq!(
            store.find(&main.id.to_string()[..8]).map(|r| r.id),
            Some(main.id)
        );
        assert!(store.find("unknown").is_none());
        assert!(store.find("").is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("instances.json");
        std::fs::write(&path, "[broken").expect("fixture written");

        let error = JsonInstanceStore::open(&path).expect_err("corrupt store must fail");
        assert!(matches!(error, StoreError::Corrupt { .. }));
    }
}
