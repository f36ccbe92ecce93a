use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use serde_json::{Value, json};

use crate::config::Config;
use crate::jobs::{BackupJob, Job, JobOutcome, MaintenanceJob, ReportJob, StockAlertJob};
use crate::reports::default_generators;
use crate::scheduler::history::{self, JobRun};
use crate::scheduler::{JobSpec, Scheduler, SchedulerOptions, StartResult, StopResult};
use crate::source::{DataSource, HttpDataSource};

/// The scheduler plus the job bodies it drives, for on-demand use.
///
/// Every operation returns a `{status, ...}` payload. Failures come back as
/// `{status: "error", error: ...}` rather than as `Err`.
pub struct Automation {
    scheduler: Scheduler,
    backup: Arc<dyn Job>,
    reports: Arc<dyn Job>,
    alerts: Arc<dyn Job>,
    maintenance: Arc<dyn Job>,
    log_dir: PathBuf,
}

impl Automation {
    pub fn from_config(config: &Config) -> Result<Self> {
        let source: Arc<dyn DataSource> = Arc::new(HttpDataSource::new(&config.source)?);
        Ok(Self::new(source, config))
    }

    pub fn new(source: Arc<dyn DataSource>, config: &Config) -> Self {
        let storage = &config.storage;
        let backup: Arc<dyn Job> = Arc::new(BackupJob::new(
            source.clone(),
            storage.backups_dir(),
            config.retention.max_backups,
        ));
        let reports: Arc<dyn Job> = Arc::new(ReportJob::new(
            default_generators(source.clone()),
            storage.reports_dir(),
        ));
        let alerts: Arc<dyn Job> = Arc::new(StockAlertJob::new(source));
        let maintenance: Arc<dyn Job> = Arc::new(MaintenanceJob::new(
            storage.backups_dir(),
            storage.reports_dir(),
            storage.logs_dir(),
            config.retention.clone(),
        ));

        let schedule = &config.schedule;
        let specs = vec![
            JobSpec {
                body: backup.clone(),
                trigger: schedule.backup.clone(),
            },
            JobSpec {
                body: reports.clone(),
                trigger: schedule.reports.clone(),
            },
            JobSpec {
                body: alerts.clone(),
                trigger: schedule.alerts.clone(),
            },
            JobSpec {
                body: maintenance.clone(),
                trigger: schedule.maintenance.clone(),
            },
        ];
        let options = SchedulerOptions::from_config(&config.scheduler, storage.logs_dir());

        Self {
            scheduler: Scheduler::new(specs, options),
            backup,
            reports,
            alerts,
            maintenance,
            log_dir: storage.logs_dir(),
        }
    }

    // --- Scheduler lifecycle ---

    pub fn start_scheduler(&self) -> Value {
        match self.scheduler.start() {
            Ok(StartResult::Started { jobs }) => json!({
                "status": "started",
                "message": format!("Scheduler started with {} jobs", jobs.len()),
                "jobs": jobs,
            }),
            Ok(StartResult::AlreadyRunning) => json!({
                "status": "already_running",
                "message": "Scheduler is already running",
            }),
            Err(e) => {
                tracing::error!("Failed to start scheduler: {e:#}");
                error_payload(format!("{e:#}"))
            }
        }
    }

    /// Blocks for up to the configured stop timeout.
    pub fn stop_scheduler(&self) -> Value {
        match self.scheduler.stop() {
            StopResult::Stopped { worker_exited } => {
                let message = if worker_exited {
                    "Scheduler stopped"
                } else {
                    "Scheduler stopped; worker may still be finishing its current job"
                };
                json!({
                    "status": "stopped",
                    "message": message,
                    "worker_exited": worker_exited,
                })
            }
            StopResult::NotRunning => json!({
                "status": "not_running",
                "message": "Scheduler is not running",
            }),
        }
    }

    pub fn scheduler_status(&self) -> Value {
        let status = self.scheduler.status();
        let label = if status.running { "running" } else { "stopped" };
        match serde_json::to_value(&status) {
            Ok(Value::Object(mut details)) => {
                details.insert("status".into(), json!(label));
                Value::Object(details)
            }
            Ok(_) => error_payload("Unexpected status shape".to_string()),
            Err(e) => error_payload(format!("Failed to serialize status: {e}")),
        }
    }

    /// Pause or resume one recurring job until the next stop.
    pub fn set_job_enabled(&self, id: &str, enabled: bool) -> Value {
        if !self.scheduler.is_running() {
            return json!({
                "status": "not_running",
                "message": "Scheduler is not running",
            });
        }
        if !self.scheduler.set_enabled(id, enabled) {
            return error_payload(format!("Unknown job: {id}"));
        }
        let label = if enabled { "enabled" } else { "disabled" };
        tracing::info!("Job {id} {label}");
        json!({"status": label, "job": id})
    }

    // --- On-demand runs ---

    pub async fn run_backup_now(&self) -> Value {
        self.run_now(self.backup.clone()).await
    }

    pub async fn run_reports_now(&self) -> Value {
        self.run_now(self.reports.clone()).await
    }

    pub async fn run_alerts_now(&self) -> Value {
        self.run_now(self.alerts.clone()).await
    }

    pub async fn run_maintenance_now(&self) -> Value {
        self.run_now(self.maintenance.clone()).await
    }

    /// Run `job` on the caller's runtime, outside the scheduler. Only the
    /// execution log file sees these runs.
    async fn run_now(&self, job: Arc<dyn Job>) -> Value {
        let id = job.id().to_string();
        tracing::info!("On-demand run: {id}");
        let started_at = Local::now().naive_local();

        let body = job.clone();
        let outcome = match tokio::spawn(async move { body.run().await }).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!("Job {id} failed: {e:#}");
                JobOutcome::error(format!("{e:#}"))
            }
            Err(e) => {
                tracing::error!("Job {id} aborted: {e}");
                JobOutcome::error(format!("Job {id} aborted: {e}"))
            }
        };

        let run = JobRun {
            job_id: id,
            started_at,
            finished_at: Local::now().naive_local(),
            outcome,
        };
        if let Err(e) = history::append_run_log(&self.log_dir, &run) {
            tracing::warn!("Failed to append execution log: {e:#}");
        }

        let mut payload = run.outcome.to_payload();
        if let Value::Object(map) = &mut payload {
            map.insert("job".into(), json!(run.job_id));
        }
        payload
    }
}

fn error_payload(error: String) -> Value {
    json!({"status": "error", "error": error})
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::source::testing::StaticSource;

    fn config(base: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.base_dir = base.to_path_buf();
        config
    }

    fn source() -> Arc<dyn DataSource> {
        Arc::new(
            StaticSource::new()
                .with(
                    "products",
                    vec![
                        json!({"id": 1, "name": "Bolt", "supplier_id": 1, "quantity": 0, "price": 2.5}),
                        json!({"id": 2, "name": "Nut", "supplier_id": 1, "quantity": 40, "price": 80}),
                    ],
                )
                .with("suppliers", vec![json!({"id": 1, "name": "Acme"})])
                .failing("orders", "orders table missing"),
        )
    }

    #[test]
    fn test_lifecycle_payloads() {
        let tmp = tempfile::tempdir().unwrap();
        let automation = Automation::new(source(), &config(tmp.path()));

        assert_eq!(automation.stop_scheduler()["status"], "not_running");
        assert_eq!(automation.scheduler_status()["status"], "stopped");

        let started = automation.start_scheduler();
        assert_eq!(started["status"], "started");
        assert_eq!(started["jobs"].as_array().unwrap().len(), 4);
        assert_eq!(started["jobs"][0]["id"], "backup");
        assert_eq!(started["jobs"][0]["trigger"], "daily at 02:00");

        assert_eq!(automation.start_scheduler()["status"], "already_running");

        let status = automation.scheduler_status();
        assert_eq!(status["status"], "running");
        assert_eq!(status["job_count"], 4);
        assert_eq!(status["worker_alive"], true);

        assert_eq!(automation.set_job_enabled("reports", false)["status"], "disabled");
        assert_eq!(automation.scheduler_status()["jobs"][1]["enabled"], false);
        assert_eq!(automation.set_job_enabled("missing", true)["status"], "error");

        let stopped = automation.stop_scheduler();
        assert_eq!(stopped["status"], "stopped");
        assert_eq!(stopped["worker_exited"], true);
        assert_eq!(automation.scheduler_status()["job_count"], 0);
        assert_eq!(automation.set_job_enabled("reports", true)["status"], "not_running");
    }

    #[tokio::test]
    async fn test_run_backup_now_degrades_missing_entities() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let automation = Automation::new(source(), &cfg);

        let payload = automation.run_backup_now().await;
        assert_eq!(payload["status"], "success");
        assert_eq!(payload["job"], "backup");
        assert_eq!(payload["total_records"], 3);
        assert_eq!(payload["artifacts"].as_array().unwrap().len(), 1);

        let logged = std::fs::read_dir(cfg.storage.logs_dir()).unwrap().count();
        assert_eq!(logged, 1);
    }

    #[tokio::test]
    async fn test_run_alerts_now_surfaces_fetch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let failing: Arc<dyn DataSource> = Arc::new(StaticSource::new().failing("products", "timeout"));
        let automation = Automation::new(failing, &config(tmp.path()));

        let payload = automation.run_alerts_now().await;
        assert_eq!(payload["status"], "error");
        assert!(payload["error"].as_str().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_run_reports_and_maintenance_now() {
        let tmp = tempfile::tempdir().unwrap();
        let automation = Automation::new(source(), &config(tmp.path()));

        let reports = automation.run_reports_now().await;
        assert_eq!(reports["status"], "success");
        assert_eq!(reports["successful_reports"], 3);

        let maintenance = automation.run_maintenance_now().await;
        assert_eq!(maintenance["status"], "success");
        assert_eq!(maintenance["total_tasks"], 3);
    }
}
