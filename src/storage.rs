//! JSON file-based usage record storage
//!
//! One pretty-printed JSON record per project under a root directory,
//! written atomically via a temp file and rename so a crash mid-write
//! never corrupts the previous record.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

use crate::error::{Error, Result};
use crate::hierarchy::UsageStore;
use crate::model::ProjectUsage;

/// File-backed [`UsageStore`].
pub struct JsonUsageStore {
    root: PathBuf,
}

impl JsonUsageStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| Error::IoAccess {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, project: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(project)))
    }
}

/// Map a project identifier to a safe file name. Matrix configuration ids
/// contain separators like `/` and `=`.
fn sanitize(project: &str) -> String {
    project
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl UsageStore for JsonUsageStore {
    async fn persist(&self, record: &ProjectUsage) -> Result<()> {
        let final_path = self.record_path(&record.project_id);
        let temp_path = final_path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(record)?;
        fs::write(&temp_path, json)
            .await
            .map_err(Error::persistence)?;
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(Error::persistence)?;
        Ok(())
    }

    async fn load(&self, project: &str) -> Result<Option<ProjectUsage>> {
        let path = self.record_path(project);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::persistence(err)),
        };

        match serde_json::from_str(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                // Treat a corrupt record as "not yet calculated" so one bad
                // file cannot abort loading the project.
                warn!(
                    project,
                    path = %path.display(),
                    error = %err,
                    "corrupt usage record, ignoring"
                );
                Ok(None)
            }
        }
    }

    async fn remove(&self, project: &str) -> Result<()> {
        let path = self.record_path(project);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::persistence(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BuildUsage;
    use tempfile::TempDir;

    fn record(project: &str) -> ProjectUsage {
        let mut usage = ProjectUsage::new(project);
        usage.upsert_build(BuildUsage {
            build_id: format!("{project}#1"),
            number: 1,
            own_size: 1234,
            cumulative_size: 1234,
        });
        usage
    }

    #[tokio::test]
    async fn roundtrips_a_record() {
        let tmp = TempDir::new().unwrap();
        let store = JsonUsageStore::new(tmp.path()).unwrap();

        store.persist(&record("project1")).await.unwrap();
        let loaded = store.load("project1").await.unwrap().unwrap();
        assert_eq!(loaded.project_id, "project1");
        assert_eq!(loaded.build_usage(), 1234);
    }

    #[tokio::test]
    async fn missing_record_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = JsonUsageStore::new(tmp.path()).unwrap();
        assert!(store.load("never-calculated").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_record_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = JsonUsageStore::new(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();
        assert!(store.load("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn matrix_ids_map_to_distinct_files() {
        let tmp = TempDir::new().unwrap();
        let store = JsonUsageStore::new(tmp.path()).unwrap();

        store.persist(&record("matrix/axis=a")).await.unwrap();
        store.persist(&record("matrix/axis=b")).await.unwrap();

        let a = store.load("matrix/axis=a").await.unwrap().unwrap();
        let b = store.load("matrix/axis=b").await.unwrap().unwrap();
        assert_eq!(a.project_id, "matrix/axis=a");
        assert_eq!(b.project_id, "matrix/axis=b");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = JsonUsageStore::new(tmp.path()).unwrap();
        store.persist(&record("p")).await.unwrap();
        store.remove("p").await.unwrap();
        store.remove("p").await.unwrap();
        assert!(store.load("p").await.unwrap().is_none());
    }
}
