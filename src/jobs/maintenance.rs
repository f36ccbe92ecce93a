use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Result;
use chrono::Local;
use serde_json::{Value, json};

use super::artifacts::{self, is_backup_file};
use super::{Job, JobOutcome};
use crate::config::RetentionConfig;

/// Age-based cleanup of logs and reports, plus a readability check over backups.
pub struct MaintenanceJob {
    backups_dir: PathBuf,
    reports_dir: PathBuf,
    logs_dir: PathBuf,
    retention: RetentionConfig,
}

impl MaintenanceJob {
    pub fn new(
        backups_dir: PathBuf,
        reports_dir: PathBuf,
        logs_dir: PathBuf,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            backups_dir,
            reports_dir,
            logs_dir,
            retention,
        }
    }

    fn cleanup(&self, task: &str, dir: &Path, ext: &str, max_age_days: u64) -> JobOutcome {
        let suffix = format!(".{ext}");
        match artifacts::remove_older_than(dir, max_age_days, SystemTime::now(), |name| {
            name.ends_with(&suffix) && !name.starts_with('.')
        }) {
            Ok(removed) => {
                tracing::info!("{task}: removed {} files older than {max_age_days} days", removed.len());
                JobOutcome::success(format!("Removed {} old files", removed.len()))
                    .with_detail("task", json!(task))
                    .with_detail("removed", json!(removed.len()))
            }
            Err(e) => {
                tracing::error!("{task} failed: {e:#}");
                JobOutcome::error(format!("{e:#}")).with_detail("task", json!(task))
            }
        }
    }

    fn check_backups(&self) -> JobOutcome {
        let task = "backup_integrity_check";
        let files = match artifacts::list_files(&self.backups_dir, is_backup_file) {
            Ok(files) => files,
            Err(e) => return JobOutcome::error(format!("{e:#}")).with_detail("task", json!(task)),
        };

        let mut invalid = Vec::new();
        for (path, _) in &files {
            if !is_valid_backup(path) {
                invalid.push(path.file_name().unwrap_or_default().to_string_lossy().to_string());
            }
        }
        let valid = files.len() - invalid.len();
        if !invalid.is_empty() {
            tracing::warn!("{} unreadable backups: {}", invalid.len(), invalid.join(", "));
        }

        JobOutcome::success(format!("{valid}/{} backups valid", files.len()))
            .with_detail("task", json!(task))
            .with_detail("valid_backups", json!(valid))
            .with_detail("total_backups", json!(files.len()))
            .with_detail("invalid_backups", json!(invalid))
    }
}

fn is_valid_backup(path: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(path) else {
        return false;
    };
    serde_json::from_str::<Value>(&content)
        .is_ok_and(|doc| doc.pointer("/metadata/entities").is_some())
}

#[async_trait::async_trait]
impl Job for MaintenanceJob {
    fn id(&self) -> &str {
        "maintenance"
    }

    fn description(&self) -> &str {
        "Prune old logs and reports, verify backups"
    }

    async fn run(&self) -> Result<JobOutcome> {
        let tasks = vec![
            self.cleanup("log_cleanup", &self.logs_dir, "log", self.retention.log_max_age_days),
            self.cleanup(
                "report_cleanup",
                &self.reports_dir,
                "json",
                self.retention.report_max_age_days,
            ),
            self.check_backups(),
        ];

        let total = tasks.len();
        let successful = tasks.iter().filter(|t| t.is_success()).count();
        let summary = format!("{successful}/{total} maintenance tasks succeeded");
        let outcome = if successful == total {
            JobOutcome::success(summary)
        } else {
            JobOutcome::error(summary)
        };

        Ok(outcome
            .with_detail("executed_at", json!(Local::now().to_rfc3339()))
            .with_detail("total_tasks", json!(total))
            .with_detail("successful_tasks", json!(successful))
            .with_detail("failed_tasks", json!(total - successful))
            .with_detail(
                "tasks",
                Value::Array(tasks.iter().map(JobOutcome::to_payload).collect()),
            ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::jobs::artifacts::testing::touch_aged;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test]
    async fn test_maintenance_prunes_and_checks() {
        let tmp = tempfile::tempdir().unwrap();
        let (backups, reports, logs) = (
            tmp.path().join("backups"),
            tmp.path().join("reports"),
            tmp.path().join("logs"),
        );
        for d in [&backups, &reports, &logs] {
            std::fs::create_dir_all(d).unwrap();
        }

        touch_aged(&logs, "jobs-old.log", DAY * 40);
        touch_aged(&logs, "jobs-new.log", DAY * 2);
        touch_aged(&reports, "inventory_report_old.json", DAY * 61);
        touch_aged(&reports, "inventory_report_new.json", DAY * 59);
        std::fs::write(
            backups.join("backup_ok.json"),
            r#"{"products": [], "metadata": {"entities": ["products"]}}"#,
        )
        .unwrap();
        std::fs::write(backups.join("backup_broken.json"), "{not json").unwrap();

        let job = MaintenanceJob::new(backups, reports.clone(), logs.clone(), RetentionConfig::default());
        let outcome = job.run().await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.details["successful_tasks"], 3);
        assert_eq!(outcome.details["tasks"][0]["removed"], 1);
        assert_eq!(outcome.details["tasks"][1]["removed"], 1);
        assert_eq!(outcome.details["tasks"][2]["valid_backups"], 1);
        assert_eq!(outcome.details["tasks"][2]["invalid_backups"][0], "backup_broken.json");

        assert!(!logs.join("jobs-old.log").exists());
        assert!(logs.join("jobs-new.log").exists());
        assert!(!reports.join("inventory_report_old.json").exists());
        assert!(reports.join("inventory_report_new.json").exists());
    }

    #[tokio::test]
    async fn test_maintenance_on_missing_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let job = MaintenanceJob::new(
            tmp.path().join("b"),
            tmp.path().join("r"),
            tmp.path().join("l"),
            RetentionConfig::default(),
        );
        let outcome = job.run().await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.details["tasks"][2]["total_backups"], 0);
    }
}
