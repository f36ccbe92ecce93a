pub mod bridge;
pub mod history;
pub mod registry;
pub mod trigger;

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::jobs::{Job, JobStatus};
pub use history::{History, JobRun};
pub use registry::{JobRegistry, ScheduledJob};
pub use trigger::Trigger;

/// A recurring job installed on every start.
pub struct JobSpec {
    pub body: Arc<dyn Job>,
    pub trigger: Trigger,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub tick: Duration,
    pub stop_timeout: Duration,
    pub history_size: usize,
    /// Where each run is appended as a line of the daily execution log.
    pub log_dir: Option<PathBuf>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(5),
            history_size: 50,
            log_dir: None,
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(config: &SchedulerConfig, log_dir: PathBuf) -> Self {
        Self {
            tick: Duration::from_secs(config.tick_secs),
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
            history_size: config.history_size,
            log_dir: Some(log_dir),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub description: String,
    pub trigger: String,
    pub enabled: bool,
    pub next_run: NaiveDateTime,
    pub last_run: Option<NaiveDateTime>,
}

impl From<&ScheduledJob> for JobInfo {
    fn from(job: &ScheduledJob) -> Self {
        Self {
            id: job.id.clone(),
            description: job.body.description().to_string(),
            trigger: job.trigger.describe(),
            enabled: job.enabled,
            next_run: job.next_run,
            last_run: job.last_run,
        }
    }
}

#[derive(Debug)]
pub enum StartResult {
    Started { jobs: Vec<JobInfo> },
    AlreadyRunning,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StopResult {
    /// `worker_exited` is false when the worker outlived the stop timeout.
    Stopped { worker_exited: bool },
    NotRunning,
}

#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub worker_alive: bool,
    pub job_count: usize,
    pub jobs: Vec<JobInfo>,
    pub recent_runs: Vec<JobRun>,
}

// --- Lifecycle ---

/// State shared with the worker thread.
struct Shared {
    running: AtomicBool,
    worker_alive: AtomicBool,
    registry: Mutex<JobRegistry>,
    history: Mutex<History>,
    log_dir: Option<PathBuf>,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    done_rx: Receiver<()>,
}

/// Signals the stopping side when the worker thread leaves, however it leaves.
struct ExitSignal {
    shared: Arc<Shared>,
    done_tx: Sender<()>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.shared.worker_alive.store(false, Ordering::SeqCst);
        let _ = self.done_tx.send(());
    }
}

pub struct Scheduler {
    jobs: Vec<JobSpec>,
    options: SchedulerOptions,
    shared: Arc<Shared>,
    /// Held across start and stop so the two never interleave.
    worker: Mutex<Option<Worker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    pub fn new(jobs: Vec<JobSpec>, options: SchedulerOptions) -> Self {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(false),
            worker_alive: AtomicBool::new(false),
            registry: Mutex::new(JobRegistry::new()),
            history: Mutex::new(History::new(options.history_size)),
            log_dir: options.log_dir.clone(),
        });
        Self {
            jobs,
            options,
            shared,
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Install the job set and spawn the worker. A second call while running
    /// reports `AlreadyRunning` and leaves the existing worker alone.
    pub fn start(&self) -> Result<StartResult> {
        let mut slot = lock(&self.worker);
        if self.is_running() {
            return Ok(StartResult::AlreadyRunning);
        }

        if let Some(previous) = slot.take() {
            // The exit signal fires just before the thread itself finishes.
            let exited = previous.handle.is_finished() || previous.done_rx.try_recv().is_ok();
            if !exited {
                *slot = Some(previous);
                bail!("Previous scheduler worker is still finishing its current job");
            }
            let _ = previous.handle.join();
        }

        let now = Local::now().naive_local();
        let installed: Vec<JobInfo> = {
            let mut registry = lock(&self.shared.registry);
            registry.clear();
            for spec in &self.jobs {
                registry.register(ScheduledJob::new(spec.body.clone(), spec.trigger.clone(), now));
            }
            registry.iter().map(JobInfo::from).collect()
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.worker_alive.store(true, Ordering::SeqCst);

        let exit = ExitSignal {
            shared: self.shared.clone(),
            done_tx,
        };
        let loop_cancel = cancel.clone();
        let tick = self.options.tick;
        let spawned = thread::Builder::new()
            .name("stockwatch-scheduler".to_string())
            .spawn(move || {
                let exit = exit;
                run_loop(&exit.shared, &loop_cancel, &wake_rx, tick);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.worker_alive.store(false, Ordering::SeqCst);
                lock(&self.shared.registry).clear();
                return Err(anyhow::Error::new(e).context("Failed to spawn scheduler thread"));
            }
        };

        *slot = Some(Worker {
            handle,
            cancel,
            wake_tx,
            done_rx,
        });
        tracing::info!("Scheduler started with {} jobs", installed.len());
        for job in &installed {
            tracing::info!("  {} ({}), next run {}", job.id, job.trigger, job.next_run);
        }
        Ok(StartResult::Started { jobs: installed })
    }

    /// Signal the worker and wait for it, bounded by the stop timeout. A job
    /// already in flight is never interrupted.
    pub fn stop(&self) -> StopResult {
        let mut slot = lock(&self.worker);
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return StopResult::NotRunning;
        }

        let worker_exited = match slot.take() {
            Some(worker) => {
                worker.cancel.store(true, Ordering::SeqCst);
                let _ = worker.wake_tx.send(());
                match worker.done_rx.recv_timeout(self.options.stop_timeout) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        let _ = worker.handle.join();
                        true
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::warn!(
                            "Scheduler worker did not exit within {:?}; it may still be finishing its current job",
                            self.options.stop_timeout
                        );
                        *slot = Some(worker);
                        false
                    }
                }
            }
            None => true,
        };

        lock(&self.shared.registry).clear();
        tracing::info!("Scheduler stopped");
        StopResult::Stopped { worker_exited }
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs: Vec<JobInfo> = lock(&self.shared.registry).iter().map(JobInfo::from).collect();
        let recent_runs = lock(&self.shared.history).recent().cloned().collect();
        SchedulerStatus {
            running: self.is_running(),
            worker_alive: self.shared.worker_alive.load(Ordering::SeqCst),
            job_count: jobs.len(),
            jobs,
            recent_runs,
        }
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        lock(&self.shared.registry).set_enabled(id, enabled)
    }

    #[cfg(test)]
    fn force_due(&self, id: &str) {
        if let Some(job) = lock(&self.shared.registry).get_mut(id) {
            job.next_run = Local::now().naive_local() - chrono::Duration::seconds(1);
        }
        if let Some(worker) = lock(&self.worker).as_ref() {
            let _ = worker.wake_tx.send(());
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).as_ref() {
            worker.cancel.store(true, Ordering::SeqCst);
        }
    }
}

// --- Worker loop ---

fn run_loop(shared: &Shared, cancel: &AtomicBool, wake_rx: &Receiver<()>, tick: Duration) {
    tracing::info!("Scheduler loop running (tick {:?})", tick);
    loop {
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        let now = Local::now().naive_local();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| run_due(shared, cancel, now))) {
            tracing::error!(
                "Scheduler tick failed: {}; retrying next tick",
                bridge::panic_message(payload.as_ref())
            );
        }

        if cancel.load(Ordering::SeqCst) {
            break;
        }
        match wake_rx.recv_timeout(tick) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::info!("Scheduler loop exited");
}

/// Run every job due at `now`, one after another, in registration order.
fn run_due(shared: &Shared, cancel: &AtomicBool, now: NaiveDateTime) {
    let due: Vec<(String, Arc<dyn Job>)> = lock(&shared.registry)
        .due_jobs(now)
        .into_iter()
        .map(|job| (job.id.clone(), job.body.clone()))
        .collect();

    for (id, body) in due {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!("Stop requested, skipping remaining due jobs");
            return;
        }

        tracing::info!("Running scheduled job: {id}");
        let started_at = Local::now().naive_local();
        let outcome = bridge::run_isolated(body.as_ref());
        let finished_at = Local::now().naive_local();

        match outcome.status {
            JobStatus::Success => tracing::info!(
                "Job {id} succeeded: {}",
                outcome.message.as_deref().unwrap_or("done")
            ),
            JobStatus::Error => tracing::error!(
                "Job {id} failed: {}",
                outcome.message.as_deref().unwrap_or("unknown error")
            ),
        }

        if let Some(next) = lock(&shared.registry).mark_fired(&id, now) {
            tracing::debug!("Job {id} next run at {next}");
        }

        shared.record(JobRun {
            job_id: id,
            started_at,
            finished_at,
            outcome,
        });
    }
}

impl Shared {
    fn record(&self, run: JobRun) {
        if let Some(dir) = &self.log_dir {
            if let Err(e) = history::append_run_log(dir, &run) {
                tracing::warn!("Failed to append execution log: {e:#}");
            }
        }
        lock(&self.history).push(run);
    }
}
