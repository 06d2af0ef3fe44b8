use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One installed copy of the managed program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    /// Version reported by the installed executable, if any.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub auto_start: bool,
}

impl InstanceRecord {
    /// A fresh record with a newly generated id and nothing installed.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            version: None,
            icon: None,
            auto_start: false,
        }
    }

    #[must_use]
    pub fn has_local_version(&self) -> bool {
        self.version.as_deref().is_some_and(|v| !v.trim().is_empty())
    }
}

/// Persistent list of instances. The engine never persists anything itself;
/// callers write back records it changed.
pub trait InstanceStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn instances(&self) -> &[InstanceRecord];

    fn instance(&self, id: Uuid) -> Option<&InstanceRecord> {
        self.instances().iter().find(|record| record.id == id)
    }

    /// # Errors
    /// Implementations fail when the record cannot be stored.
    fn add_instance(&mut self, record: InstanceRecord) -> Result<(), Self::Error>;

    /// Replace the record with the same id. Returns `false` if none exists.
    ///
    /// # Errors
    /// Implementations fail when the record cannot be stored.
    fn update_instance(&mut self, record: &InstanceRecord) -> Result<bool, Self::Error>;

    /// # Errors
    /// Implementations fail when the store cannot be modified.
    fn remove_instance(&mut self, id: Uuid) -> Result<Option<InstanceRecord>, Self::Error>;

    /// # Errors
    /// Implementations fail when the backing storage cannot be written.
    fn save(&self) -> Result<(), Self::Error>;
}
