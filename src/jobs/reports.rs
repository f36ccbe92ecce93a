use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use serde_json::{Value, json};

use super::{Job, JobOutcome, artifacts, success_rate};
use crate::reports::ReportGenerator;

/// Runs every report generator, persisting each successful report on its own.
/// One failing generator never stops the others.
pub struct ReportJob {
    generators: Vec<Box<dyn ReportGenerator>>,
    dir: PathBuf,
}

impl ReportJob {
    pub fn new(generators: Vec<Box<dyn ReportGenerator>>, dir: PathBuf) -> Self {
        Self { generators, dir }
    }

    async fn run_one(&self, generator: &dyn ReportGenerator, slug: &str) -> JobOutcome {
        let kind = generator.kind().to_string();
        let report = match generator.generate().await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("{kind} report failed: {e:#}");
                return JobOutcome::error(format!("{e:#}")).with_detail("type", json!(kind));
            }
        };

        let filename = format!("{kind}_report_{slug}.json");
        match artifacts::write_json(&self.dir, &filename, &report) {
            Ok(path) => JobOutcome::success(format!("{kind} report saved"))
                .with_artifact(path)
                .with_detail("type", json!(kind))
                .with_detail("filename", json!(filename)),
            Err(e) => {
                tracing::error!("Failed to save {kind} report: {e:#}");
                JobOutcome::error(format!("{e:#}")).with_detail("type", json!(kind))
            }
        }
    }
}

#[async_trait::async_trait]
impl Job for ReportJob {
    fn id(&self) -> &str {
        "reports"
    }

    fn description(&self) -> &str {
        "Generate inventory, supplier and financial reports"
    }

    async fn run(&self) -> Result<JobOutcome> {
        let slug = artifacts::timestamp_slug(Local::now());
        let mut parts = Vec::with_capacity(self.generators.len());
        for generator in &self.generators {
            parts.push(self.run_one(generator.as_ref(), &slug).await);
        }

        let total = parts.len();
        let successful = parts.iter().filter(|p| p.is_success()).count();
        let failed = total - successful;
        let summary = format!("{successful}/{total} reports generated");
        tracing::info!("Report job finished: {summary}");

        let mut outcome = if successful == 0 && total > 0 {
            JobOutcome::error(summary)
        } else {
            JobOutcome::success(summary)
        };
        for part in &parts {
            outcome.artifacts.extend(part.artifacts.iter().cloned());
        }

        Ok(outcome
            .with_detail("generated_at", json!(Local::now().to_rfc3339()))
            .with_detail("total_reports", json!(total))
            .with_detail("successful_reports", json!(successful))
            .with_detail("failed_reports", json!(failed))
            .with_detail("success_rate", json!(success_rate(successful, total)))
            .with_detail("reports_directory", json!(self.dir.display().to_string()))
            .with_detail(
                "reports",
                Value::Array(parts.iter().map(JobOutcome::to_payload).collect()),
            ))
    }
}
