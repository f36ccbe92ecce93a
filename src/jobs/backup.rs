use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::artifacts::{self, is_backup_file};
use super::{Job, JobOutcome};
use crate::source::{DataSource, Fetched, Record};

/// Entity collections included in every snapshot, in fetch order.
pub const TRACKED_ENTITIES: [&str; 3] = ["products", "suppliers", "orders"];

const SNAPSHOT_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
pub struct BackupSnapshot {
    #[serde(flatten)]
    pub entities: BTreeMap<String, Vec<Record>>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: String,
    pub version: String,
    pub total_records: usize,
    pub entities: Vec<String>,
}

impl BackupSnapshot {
    pub fn new(entities: BTreeMap<String, Vec<Record>>, created_at: DateTime<Local>) -> Self {
        let total_records = entities.values().map(Vec::len).sum();
        let metadata = SnapshotMetadata {
            created_at: created_at.to_rfc3339(),
            version: SNAPSHOT_VERSION.to_string(),
            total_records,
            entities: TRACKED_ENTITIES.iter().map(|e| e.to_string()).collect(),
        };
        Self { entities, metadata }
    }
}

pub struct BackupJob {
    source: Arc<dyn DataSource>,
    dir: PathBuf,
    max_backups: usize,
}

impl BackupJob {
    pub fn new(source: Arc<dyn DataSource>, dir: PathBuf, max_backups: usize) -> Self {
        Self {
            source,
            dir,
            max_backups,
        }
    }
}

#[async_trait::async_trait]
impl Job for BackupJob {
    fn id(&self) -> &str {
        "backup"
    }

    fn description(&self) -> &str {
        "Snapshot products, suppliers and orders to a timestamped JSON file"
    }

    async fn run(&self) -> Result<JobOutcome> {
        let now = Local::now();
        let mut entities = BTreeMap::new();

        for entity in TRACKED_ENTITIES {
            let records = match self.source.fetch(entity).await {
                Fetched::Data(records) => {
                    tracing::info!("Backup of {entity}: {} records", records.len());
                    records
                }
                Fetched::Error(e) => {
                    tracing::warn!("Backing up {entity} as empty: {e}");
                    Vec::new()
                }
            };
            entities.insert(entity.to_string(), records);
        }

        let snapshot = BackupSnapshot::new(entities, now);
        let filename = format!("backup_{}.json", artifacts::timestamp_slug(now));
        let path = artifacts::write_json(&self.dir, &filename, &snapshot)?;
        tracing::info!(
            "Backup written: {} ({} records)",
            path.display(),
            snapshot.metadata.total_records
        );

        // Retention only ever runs after the new snapshot is safely on disk.
        let pruned = match artifacts::prune_to_newest(&self.dir, self.max_backups, is_backup_file) {
            Ok(removed) => {
                for old in &removed {
                    tracing::info!("Removed old backup: {}", old.display());
                }
                removed.len()
            }
            Err(e) => {
                tracing::error!("Backup retention failed: {e:#}");
                0
            }
        };

        Ok(JobOutcome::success(format!("Backup {filename} created"))
            .with_artifact(path.clone())
            .with_detail("backup_file", json!(filename))
            .with_detail("backup_path", json!(path.display().to_string()))
            .with_detail("total_records", json!(snapshot.metadata.total_records))
            .with_detail("entities_backed_up", json!(TRACKED_ENTITIES))
            .with_detail("created_at", json!(snapshot.metadata.created_at))
            .with_detail("backups_pruned", json!(pruned)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::jobs::artifacts::testing::touch_aged;
    use crate::source::testing::StaticSource;

    fn source() -> Arc<dyn DataSource> {
        Arc::new(
            StaticSource::new()
                .with("products", vec![json!({"id": 1}), json!({"id": 2})])
                .with("suppliers", vec![json!({"id": 10})])
                .failing("orders", "connection refused"),
        )
    }

    fn backups_in(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| is_backup_file(n))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_backup_degrades_failed_entity_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let job = BackupJob::new(source(), tmp.path().to_path_buf(), 10);

        let outcome = job.run().await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.details["total_records"], 3);
        assert_eq!(outcome.artifacts.len(), 1);

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&outcome.artifacts[0]).unwrap())
                .unwrap();
        assert_eq!(doc["products"].as_array().unwrap().len(), 2);
        assert_eq!(doc["suppliers"].as_array().unwrap().len(), 1);
        assert_eq!(doc["orders"], json!([]));
        assert_eq!(doc["metadata"]["version"], "1.0");
        assert_eq!(doc["metadata"]["total_records"], 3);
        assert_eq!(
            doc["metadata"]["entities"],
            json!(["products", "suppliers", "orders"])
        );
    }

    #[tokio::test]
    async fn test_retention_keeps_most_recent() {
        let tmp = tempfile::tempdir().unwrap();
        // backup_old_00 is the most recent of the pre-existing files.
        for i in 0..12u64 {
            touch_aged(
                tmp.path(),
                &format!("backup_old_{i:02}.json"),
                Duration::from_secs(3600 * (i + 1)),
            );
        }

        let job = BackupJob::new(source(), tmp.path().to_path_buf(), 10);
        let outcome = job.run().await.unwrap();
        assert_eq!(outcome.details["backups_pruned"], 3);

        let remaining = backups_in(tmp.path());
        assert_eq!(remaining.len(), 10);
        let new_name = outcome.artifacts[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(remaining.contains(&new_name));
        for i in 0..9 {
            assert!(remaining.contains(&format!("backup_old_{i:02}.json")));
        }
        for i in 9..12 {
            assert!(!remaining.contains(&format!("backup_old_{i:02}.json")));
        }
    }

    #[tokio::test]
    async fn test_retention_ignores_unrelated_files() {
        let tmp = tempfile::tempdir().unwrap();
        touch_aged(tmp.path(), "manual-export.json", Duration::from_secs(999_999));
        let job = BackupJob::new(source(), tmp.path().to_path_buf(), 1);
        job.run().await.unwrap();
        assert!(tmp.path().join("manual-export.json").exists());
        assert_eq!(backups_in(tmp.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_zero_retention_still_keeps_new_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        touch_aged(tmp.path(), "backup_old.json", Duration::from_secs(3600));
        let job = BackupJob::new(source(), tmp.path().to_path_buf(), 0);

        let outcome = job.run().await.unwrap();
        assert!(outcome.is_success());
        assert!(outcome.artifacts[0].exists());
        assert_eq!(backups_in(tmp.path()).len(), 1);
        assert!(!tmp.path().join("backup_old.json").exists());
    }
}
