//! Filesystem-backed storage rooted at a directory.
//!
//! Buckets map to sub-directories of the root and keys to relative paths
//! inside them. Writes go to a temporary sibling first and are renamed into
//! place so readers never observe a half-written dataset.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use mlpromote_core::dataset::DatasetLocation;

use super::StorageGateway;
use crate::error::StorageError;

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a location to a path, refusing keys that escape the bucket.
    fn path_for(&self, location: &DatasetLocation) -> Result<PathBuf, StorageError> {
        let relative = Path::new(&location.key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || location.bucket.contains(['/', '\\']) || location.bucket.is_empty() {
            return Err(StorageError::io(location, "location escapes the storage root"));
        }
        Ok(self.root.join(&location.bucket).join(relative))
    }
}

#[async_trait]
impl StorageGateway for LocalStorage {
    fn scheme(&self) -> &'static str {
        "file"
    }

    async fn get_object(&self, location: &DatasetLocation) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::DataNotFound(location.to_string()))
            }
            Err(e) => Err(StorageError::io(location, e)),
        }
    }

    async fn put_object(
        &self,
        location: &DatasetLocation,
        bytes: Vec<u8>,
    ) -> Result<(), StorageError> {
        let path = self.path_for(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(location, e))?;
        }
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageError::io(location, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::io(location, e))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) {
            return Err(StorageError::io(bucket, "bucket escapes the storage root"));
        }
        let bucket_root = self.root.join(bucket);
        let mut keys = Vec::new();
        let mut pending = vec![bucket_root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(dir.display(), e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io(dir.display(), e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::io(path.display(), e))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&bucket_root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) && !key.ends_with(".tmp") {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mlpromote_core::dataset::DatasetHandle;
    use serde_json::json;

    fn handle(location: &DatasetLocation) -> DatasetHandle {
        let record = json!({ "feature1": 1, "target_column": 2.5 })
            .as_object()
            .cloned()
            .unwrap();
        DatasetHandle::raw(location.clone(), vec![record])
    }

    #[tokio::test]
    async fn write_then_read_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let location = DatasetLocation::new("yf-dev", "processed/data.jsonl");

        let uri = storage
            .write_dataset(&handle(&location), &location)
            .await
            .unwrap();
        assert_eq!(uri, "file://yf-dev/processed/data.jsonl");

        let read = storage.read_dataset(&location).await.unwrap();
        assert_eq!(read.records, handle(&location).records);
        assert_eq!(read.schema.fields, vec!["feature1", "target_column"]);
    }

    #[tokio::test]
    async fn missing_object_is_data_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let location = DatasetLocation::new("yf-dev", "raw/absent.jsonl");

        assert_matches!(
            storage.read_dataset(&location).await,
            Err(StorageError::DataNotFound(_))
        );
    }

    #[tokio::test]
    async fn malformed_object_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let location = DatasetLocation::new("yf-dev", "raw/bad.jsonl");
        storage
            .put_object(&location, b"not json\n".to_vec())
            .await
            .unwrap();

        assert_matches!(
            storage.read_dataset(&location).await,
            Err(StorageError::Format { .. })
        );
    }

    #[tokio::test]
    async fn keys_cannot_escape_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let location = DatasetLocation::new("yf-dev", "../../etc/passwd");

        assert_matches!(
            storage.get_object(&location).await,
            Err(StorageError::Io { .. })
        );
    }

    #[tokio::test]
    async fn sibling_keys_sharing_a_stem_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let json = DatasetLocation::new("yf-dev", "raw/data.json");
        let jsonl = DatasetLocation::new("yf-dev", "raw/data.jsonl");

        let (a, b) = tokio::join!(
            storage.put_object(&json, b"[{\"a\":1}]".to_vec()),
            storage.put_object(&jsonl, b"{\"b\":2}\n".to_vec()),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(storage.get_object(&json).await.unwrap(), b"[{\"a\":1}]");
        assert_eq!(storage.get_object(&jsonl).await.unwrap(), b"{\"b\":2}\n");
        assert!(!dir.path().join("yf-dev/raw/data.tmp").exists());
        assert!(!dir.path().join("yf-dev/raw/data.jsonl.tmp").exists());
    }

    #[tokio::test]
    async fn list_objects_filters_by_prefix_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        for key in [
            "raw/data_20261019_120000.jsonl",
            "raw/data_20261018_120000.jsonl",
            "processed/data_20261019_120000.jsonl",
            "raw/nested/extra.jsonl",
        ] {
            storage
                .put_object(&DatasetLocation::new("yf-dev", key), b"{}\n".to_vec())
                .await
                .unwrap();
        }

        assert_eq!(
            storage.list_objects("yf-dev", "raw/").await.unwrap(),
            vec![
                "raw/data_20261018_120000.jsonl",
                "raw/data_20261019_120000.jsonl",
                "raw/nested/extra.jsonl",
            ]
        );
        assert!(storage.list_objects("yf-dev", "models/").await.unwrap().is_empty());
        assert!(storage.list_objects("absent", "").await.unwrap().is_empty());
        assert_matches!(
            storage.list_objects("../up", "").await,
            Err(StorageError::Io { .. })
        );
    }

    #[tokio::test]
    async fn artifact_reference_carries_checksum_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let location = DatasetLocation::new("yf-dev", "models/run-1/model.json");

        let artifact = storage
            .write_artifact(&location, b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(artifact.size_bytes, 2);
        assert_eq!(artifact.checksum.len(), 64);
        assert_eq!(artifact.uri, "file://yf-dev/models/run-1/model.json");
    }
}
