use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::jobs::{Job, JobOutcome};

/// Drive `job` to completion on a fresh single-threaded runtime.
///
/// The runtime exists only for this call: it is dropped before returning, so
/// any task the body spawned and left behind is cancelled with it. Errors and
/// panics from the body come back as an error outcome.
pub fn run_isolated(job: &dyn Job) -> JobOutcome {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .thread_name(format!("job-{}", job.id()))
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return JobOutcome::error(format!("Failed to start job runtime: {e}")),
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(job.run())));
    drop(runtime);

    match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => JobOutcome::error(format!("{e:#}")),
        Err(payload) => JobOutcome::error(format!("Job panicked: {}", panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use anyhow::Result;

    use super::*;
    use crate::jobs::JobStatus;
    use crate::scheduler::registry::testing::CountingJob;

    #[test]
    fn test_success_passes_through() {
        let job = CountingJob::new("ok");
        let outcome = run_isolated(&job);
        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(job.runs(), 1);
    }

    #[test]
    fn test_error_becomes_error_outcome() {
        let mut job = CountingJob::new("bad");
        job.fail = true;
        let outcome = run_isolated(&job);
        assert_eq!(outcome.status, JobStatus::Error);
        assert_eq!(outcome.message.as_deref(), Some("bad failed"));
    }

    #[test]
    fn test_panic_becomes_error_outcome() {
        let mut job = CountingJob::new("boom");
        job.panic = true;
        let outcome = run_isolated(&job);
        assert_eq!(outcome.status, JobStatus::Error);
        assert!(outcome.message.unwrap().contains("boom blew up"));
    }

    /// Spawns a task that would set the flag long after the body returns.
    struct Leaky {
        flag: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Job for Leaky {
        fn id(&self) -> &str {
            "leaky"
        }

        fn description(&self) -> &str {
            "leaves a task behind"
        }

        async fn run(&self) -> Result<JobOutcome> {
            let flag = self.flag.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
            });
            Ok(JobOutcome::success("spawned"))
        }
    }

    #[test]
    fn test_leftover_tasks_do_not_outlive_invocation() {
        let flag = Arc::new(AtomicBool::new(false));
        let outcome = run_isolated(&Leaky { flag: flag.clone() });
        assert!(outcome.is_success());
        std::thread::sleep(Duration::from_millis(150));
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_usable_from_plain_thread() {
        let handle = std::thread::spawn(|| run_isolated(&CountingJob::new("threaded")));
        assert!(handle.join().unwrap().is_success());
    }
}
