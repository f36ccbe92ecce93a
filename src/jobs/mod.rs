pub mod alerts;
pub mod artifacts;
pub mod backup;
pub mod maintenance;
pub mod reports;

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use alerts::StockAlertJob;
pub use backup::BackupJob;
pub use maintenance::MaintenanceJob;
pub use reports::ReportJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Error,
}

/// Result of one job execution, or of one step inside a compound job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<PathBuf>,
    /// Job-specific fields, flattened into the payload.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl JobOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Success,
            message: Some(message.into()),
            artifacts: Vec::new(),
            details: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            message: Some(message.into()),
            artifacts: Vec::new(),
            details: Map::new(),
        }
    }

    pub fn with_artifact(mut self, path: PathBuf) -> Self {
        self.artifacts.push(path);
        self
    }

    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    /// Control-surface payload: `{status, ...details}`, with the failure
    /// message under `error` for failed outcomes.
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        match self.status {
            JobStatus::Success => {
                payload.insert("status".into(), Value::from("success"));
                if let Some(msg) = &self.message {
                    payload.insert("message".into(), Value::from(msg.as_str()));
                }
            }
            JobStatus::Error => {
                payload.insert("status".into(), Value::from("error"));
                let msg = self.message.as_deref().unwrap_or("unknown error");
                payload.insert("error".into(), Value::from(msg));
            }
        }
        if !self.artifacts.is_empty() {
            let artifacts = self
                .artifacts
                .iter()
                .map(|p| Value::from(p.display().to_string()))
                .collect();
            payload.insert("artifacts".into(), Value::Array(artifacts));
        }
        for (k, v) in &self.details {
            payload.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Value::Object(payload)
    }
}

/// A recurring unit of work. Bodies are async; the scheduler drives them to
/// completion on an isolated runtime, on-demand calls await them directly.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> &str;
    fn description(&self) -> &str;
    async fn run(&self) -> Result<JobOutcome>;
}

/// Percentage of `part` in `total`, rounded to two decimals. Zero when `total` is zero.
pub fn success_rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
