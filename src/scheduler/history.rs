use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;

use crate::jobs::{JobOutcome, JobStatus};

/// One finished job execution.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub job_id: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub outcome: JobOutcome,
}

impl JobRun {
    pub fn log_line(&self) -> String {
        let status = match self.outcome.status {
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        };
        let took = (self.finished_at - self.started_at).num_milliseconds();
        format!(
            "{} [{}] {status} ({took}ms): {}",
            self.started_at.format("%H:%M:%S"),
            self.job_id,
            self.outcome.message.as_deref().unwrap_or("-"),
        )
    }
}

/// Bounded execution log, most recent first.
pub struct History {
    runs: VecDeque<JobRun>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            runs: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    pub fn push(&mut self, run: JobRun) {
        if self.capacity == 0 {
            return;
        }
        self.runs.push_front(run);
        self.runs.truncate(self.capacity);
    }

    pub fn recent(&self) -> impl Iterator<Item = &JobRun> {
        self.runs.iter()
    }
}

pub fn run_log_path(dir: &Path, day: &str) -> PathBuf {
    dir.join(format!("jobs-{day}.log"))
}

/// Append `run` to today's execution log under `dir`.
pub fn append_run_log(dir: &Path, run: &JobRun) -> Result<()> {
    let today = Local::now().format("%Y-%m-%d").to_string();
    let path = run_log_path(dir, &today);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log dir: {}", dir.display()))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log: {}", path.display()))?;
    writeln!(file, "{}", run.log_line())
        .with_context(|| format!("Failed to write log: {}", path.display()))
}
