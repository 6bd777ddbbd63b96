use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;

use crate::error::MemoryError;
use crate::memory::MemoryRecord;

/// One JSON file per session under `base_path`.
#[derive(Debug, Clone)]
pub struct JsonMemoryStorage {
    base_path: PathBuf,
}

impl JsonMemoryStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub async fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.base_path).await
    }

    pub fn record_path(&self, session_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", session_id))
    }

    pub async fn save_record(
        &self,
        session_id: &str,
        record: &MemoryRecord,
    ) -> Result<(), MemoryError> {
        fs::create_dir_all(&self.base_path).await?;
        let mut record = record.clone();
        record.last_updated = Utc::now();
        let json = serde_json::to_string_pretty(&record)?;
        fs::write(self.record_path(session_id), json).await?;
        Ok(())
    }

    /// Loads a record. A corrupt file is logged and treated as missing.
    pub async fn load_record(&self, session_id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        let path = self.record_path(session_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(error) => {
                log::warn!("Ignoring unreadable memory file {:?}: {}", path, error);
                Ok(None)
            }
        }
    }

    pub async fn delete_record(&self, session_id: &str) -> Result<bool, MemoryError> {
        match fs::remove_file(self.record_path(session_id)).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait::async_trait]
pub trait MemoryStorage: Send + Sync {
    async fn save_record(&self, session_id: &str, record: &MemoryRecord)
        -> Result<(), MemoryError>;
    async fn load_record(&self, session_id: &str) -> Result<Option<MemoryRecord>, MemoryError>;
    async fn delete_record(&self, session_id: &str) -> Result<bool, MemoryError>;
}

#[async_trait::async_trait]
impl MemoryStorage for JsonMemoryStorage {
    async fn save_record(
        &self,
        session_id: &str,
        record: &MemoryRecord,
    ) -> Result<(), MemoryError> {
        JsonMemoryStorage::save_record(self, session_id, record).await
    }

    async fn load_record(&self, session_id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        JsonMemoryStorage::load_record(self, session_id).await
    }

    async fn delete_record(&self, session_id: &str) -> Result<bool, MemoryError> {
        JsonMemoryStorage::delete_record(self, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEntry, SessionMemoryStore};
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_and_load_record() {
        let dir = tempdir().unwrap();
        let storage = JsonMemoryStorage::new(dir.path());

        let mut store = SessionMemoryStore::default();
        store.set_dataset_info("titanic.csv");
        store.append(MemoryEntry::analysis("Women survived more often"));
        storage.save_record("s1", &store.record()).await.unwrap();

        let loaded = storage.load_record("s1").await.unwrap().unwrap();
        assert_eq!(loaded.analyses.len(), 1);
        assert_eq!(loaded.dataset_info.as_deref(), Some("titanic.csv"));
        assert_eq!(loaded.session_start, store.session_start());
    }

    #[tokio::test]
    async fn record_uses_camel_case_keys() {
        let dir = tempdir().unwrap();
        let storage = JsonMemoryStorage::new(dir.path());
        storage
            .save_record("s1", &SessionMemoryStore::default().record())
            .await
            .unwrap();

        let raw = std::fs::read_to_string(storage.record_path("s1")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for key in ["sessionStart", "analyses", "conclusions", "datasetInfo", "lastUpdated"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn missing_and_corrupt_files_load_as_none() {
        let dir = tempdir().unwrap();
        let storage = JsonMemoryStorage::new(dir.path());
        assert!(storage.load_record("absent").await.unwrap().is_none());

        std::fs::write(storage.record_path("broken"), "{not json").unwrap();
        assert!(storage.load_record("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_base_directory_loads_as_none() {
        let dir = tempdir().unwrap();
        let storage = JsonMemoryStorage::new(dir.path().join("never-created"));
        assert!(storage.load_record("s1").await.unwrap().is_none());
        assert!(!storage.delete_record("s1").await.unwrap());
    }

    #[test]
    fn init_creates_base_directory() {
        let dir = tempdir().unwrap();
        let storage = JsonMemoryStorage::new(dir.path().join("nested").join("memory"));
        tokio_test::block_on(storage.init()).unwrap();
        assert!(dir.path().join("nested").join("memory").is_dir());
    }

    #[tokio::test]
    async fn delete_record() {
        let dir = tempdir().unwrap();
        let storage = JsonMemoryStorage::new(dir.path());
        storage
            .save_record("s1", &SessionMemoryStore::default().record())
            .await
            .unwrap();

        assert!(storage.delete_record("s1").await.unwrap());
        assert!(!storage.delete_record("s1").await.unwrap());
    }
}
