use std::sync::Arc;

use chrono::NaiveDateTime;

use super::Trigger;
use crate::jobs::Job;

pub struct ScheduledJob {
    pub id: String,
    pub trigger: Trigger,
    pub body: Arc<dyn Job>,
    pub next_run: NaiveDateTime,
    pub last_run: Option<NaiveDateTime>,
    pub enabled: bool,
}

impl ScheduledJob {
    /// First run is the trigger's next occurrence after `now`.
    pub fn new(body: Arc<dyn Job>, trigger: Trigger, now: NaiveDateTime) -> Self {
        Self {
            id: body.id().to_string(),
            next_run: trigger.next_occurrence(now),
            trigger,
            body,
            last_run: None,
            enabled: true,
        }
    }
}

/// Recurring jobs in registration order.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Vec<ScheduledJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `job`, replacing (in place) any job with the same id.
    pub fn register(&mut self, job: ScheduledJob) {
        match self.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job,
            None => self.jobs.push(job),
        }
    }

    pub fn due_jobs(&self, now: NaiveDateTime) -> Vec<&ScheduledJob> {
        self.jobs
            .iter()
            .filter(|j| j.enabled && j.next_run <= now)
            .collect()
    }

    /// Record a firing at `fired_at` and move `next_run` past it.
    pub fn mark_fired(&mut self, id: &str, fired_at: NaiveDateTime) -> Option<NaiveDateTime> {
        let job = self.jobs.iter_mut().find(|j| j.id == id)?;
        job.last_run = Some(fired_at);
        job.next_run = job.trigger.next_occurrence(fired_at);
        Some(job.next_run)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                job.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledJob> {
        self.jobs.iter()
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut ScheduledJob> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::Result;

    use crate::jobs::{Job, JobOutcome};

    /// Job that counts its runs, with optional failure modes and a delay.
    pub struct CountingJob {
        pub id: &'static str,
        pub runs: AtomicUsize,
        pub fail: bool,
        pub panic: bool,
        pub delay: Option<Duration>,
    }

    impl CountingJob {
        pub fn new(id: &'static str) -> Self {
            Self {
                id,
                runs: AtomicUsize::new(0),
                fail: false,
                panic: false,
                delay: None,
            }
        }

        pub fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Job for CountingJob {
        fn id(&self) -> &str {
            self.id
        }

        fn description(&self) -> &str {
            "test job"
        }

        async fn run(&self) -> Result<JobOutcome> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("{} blew up", self.id);
            }
            if self.fail {
                anyhow::bail!("{} failed", self.id);
            }
            match self.delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
            Ok(JobOutcome::success(format!("{} ok", self.id)))
        }
    }
}
