//! kite-scheduler: named jobs on cron expressions.
//!
//! Each registered job runs in its own task. Guarantees:
//! - at most one concurrent instance per job name (a busy flag; an
//!   overlapping tick or manual trigger is skipped, not queued)
//! - missed ticks are not backfilled — after a long run the next fire time
//!   is computed fresh
//! - per-job statistics survive for the life of the scheduler
//! - clean shutdown through a watch flag, one final stop log line per job
//!
//! Schedules are standard cron with a seconds field, evaluated in the
//! exchange's timezone (Asia/Seoul).

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Asia::Seoul;
use cron::Schedule;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Job contract
// ---------------------------------------------------------------------------

/// A schedulable unit of work. Implementations must be cheap to share.
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self) -> Result<()>;
}

/// Blanket adapter so closures returning futures can register directly.
pub struct FnJob<F>(pub F);

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    async fn run(&self) -> Result<()> {
        (self.0)().await
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobStats {
    pub runs: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct JobEntry {
    name: String,
    expr: String,
    schedule: Schedule,
    job: Arc<dyn Job>,
    busy: AtomicBool,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Arc<JobEntry>>,
    stats: Arc<Mutex<BTreeMap<String, JobStats>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named job. Fails on an unparseable cron expression or a
    /// duplicate name.
    pub fn register(&mut self, name: &str, expr: &str, job: Arc<dyn Job>) -> Result<()> {
        if self.jobs.iter().any(|j| j.name == name) {
            anyhow::bail!("job already registered: {name}");
        }
        let schedule = Schedule::from_str(expr)
            .with_context(|| format!("invalid cron expression for '{name}': {expr}"))?;
        self.jobs.push(Arc::new(JobEntry {
            name: name.to_string(),
            expr: expr.to_string(),
            schedule,
            job,
            busy: AtomicBool::new(false),
        }));
        self.stats.lock().insert(name.to_string(), JobStats::default());
        Ok(())
    }

    /// (name, cron expression) for every registered job.
    pub fn list(&self) -> Vec<(String, String)> {
        self.jobs
            .iter()
            .map(|j| (j.name.clone(), j.expr.clone()))
            .collect()
    }

    pub fn stats(&self) -> BTreeMap<String, JobStats> {
        self.stats.lock().clone()
    }

    /// Run a job immediately by name, honoring the non-overlap guarantee.
    /// Returns Ok(false) when the job is already running.
    pub async fn trigger(&self, name: &str) -> Result<bool> {
        let entry = self
            .jobs
            .iter()
            .find(|j| j.name == name)
            .with_context(|| format!("no such job: {name}"))?;
        Ok(execute(entry, &self.stats).await)
    }

    /// Spawn one task per job; tasks stop when the shutdown flag flips.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.jobs
            .iter()
            .map(|entry| {
                let entry = Arc::clone(entry);
                let stats = Arc::clone(&self.stats);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(job = %entry.name, schedule = %entry.expr, "job scheduled");
                    loop {
                        // Fresh fire time after each run: missed ticks are
                        // dropped, never replayed.
                        let Some(next) = entry.schedule.upcoming(Seoul).next() else {
                            warn!(job = %entry.name, "schedule has no future fire times");
                            break;
                        };
                        let wait = (next.with_timezone(&Utc) - Utc::now())
                            .to_std()
                            .unwrap_or_default();

                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {
                                execute(&entry, &stats).await;
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                    info!(job = %entry.name, "job stopped");
                })
            })
            .collect()
    }
}

/// Run one job instance with the busy flag held. Returns false when the
/// previous instance was still running.
async fn execute(entry: &JobEntry, stats: &Mutex<BTreeMap<String, JobStats>>) -> bool {
    if entry
        .busy
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!(job = %entry.name, "previous instance still running; tick skipped");
        return false;
    }

    let started = Utc::now();
    {
        let mut map = stats.lock();
        let s = map.entry(entry.name.clone()).or_default();
        s.runs += 1;
        s.last_run = Some(started);
    }

    info!(job = %entry.name, "job run start");
    let outcome = entry.job.run().await;
    let finished = Utc::now();

    {
        let mut map = stats.lock();
        let s = map.entry(entry.name.clone()).or_default();
        match &outcome {
            Ok(()) => {
                s.successes += 1;
                s.last_success = Some(finished);
            }
            Err(e) => {
                s.failures += 1;
                s.last_failure = Some(finished);
                error!(job = %entry.name, error = %e, "job run failed");
            }
        }
    }
    if outcome.is_ok() {
        info!(job = %entry.name, "job run complete");
    }

    entry.busy.store(false, Ordering::SeqCst);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn counting_job(counter: Arc<AtomicU32>, fail: bool) -> Arc<dyn Job> {
        Arc::new(FnJob(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if fail {
                    anyhow::bail!("boom");
                }
                Ok(())
            }
        }))
    }

    #[test]
    fn register_rejects_bad_cron_and_duplicates() {
        let mut s = Scheduler::new();
        let c = Arc::new(AtomicU32::new(0));
        assert!(s
            .register("ok", "0 30 8 * * Mon-Fri *", counting_job(c.clone(), false))
            .is_ok());
        assert!(s
            .register("bad", "every tuesday", counting_job(c.clone(), false))
            .is_err());
        assert!(s
            .register("ok", "0 0 9 * * * *", counting_job(c, false))
            .is_err());
    }

    #[tokio::test]
    async fn trigger_runs_and_records_stats() {
        let mut s = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        s.register("brain", "0 30 8 * * Mon-Fri *", counting_job(counter.clone(), false))
            .unwrap();

        assert!(s.trigger("brain").await.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let stats = s.stats();
        let js = &stats["brain"];
        assert_eq!(js.runs, 1);
        assert_eq!(js.successes, 1);
        assert_eq!(js.failures, 0);
        assert!(js.last_run.is_some());
        assert!(js.last_success.is_some());
        assert!(js.last_failure.is_none());
    }

    #[tokio::test]
    async fn failures_count_separately() {
        let mut s = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        s.register("flaky", "0 0 9 * * * *", counting_job(counter, true))
            .unwrap();

        s.trigger("flaky").await.unwrap();
        s.trigger("flaky").await.unwrap();

        let stats = s.stats();
        assert_eq!(stats["flaky"].runs, 2);
        assert_eq!(stats["flaky"].failures, 2);
        assert_eq!(stats["flaky"].successes, 0);
        assert!(stats["flaky"].last_failure.is_some());
    }

    #[tokio::test]
    async fn trigger_unknown_job_errors() {
        let s = Scheduler::new();
        assert!(s.trigger("ghost").await.is_err());
    }

    #[tokio::test]
    async fn overlapping_instance_is_skipped() {
        struct SlowJob {
            entered: Arc<AtomicU32>,
            release: Arc<tokio::sync::Notify>,
        }

        #[async_trait]
        impl Job for SlowJob {
            async fn run(&self) -> Result<()> {
                self.entered.fetch_add(1, Ordering::SeqCst);
                self.release.notified().await;
                Ok(())
            }
        }

        let entered = Arc::new(AtomicU32::new(0));
        let release = Arc::new(tokio::sync::Notify::new());
        let mut s = Scheduler::new();
        s.register(
            "slow",
            "0 0 9 * * * *",
            Arc::new(SlowJob {
                entered: entered.clone(),
                release: release.clone(),
            }),
        )
        .unwrap();
        let s = Arc::new(s);

        let first = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.trigger("slow").await.unwrap() })
        };
        // Wait until the first instance is inside run().
        while entered.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Second trigger while busy: skipped.
        assert!(!s.trigger("slow").await.unwrap());
        assert_eq!(entered.load(Ordering::SeqCst), 1);

        release.notify_one();
        assert!(first.await.unwrap());
    }

    #[tokio::test]
    async fn scheduler_tasks_stop_on_shutdown() {
        let mut s = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        s.register("idle", "0 0 3 1 1 * 2099", counting_job(counter, false))
            .unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handles = s.start(stop_rx);

        stop_tx.send(true).unwrap();
        for h in handles {
            tokio::time::timeout(Duration::from_secs(5), h)
                .await
                .expect("job task must stop")
                .unwrap();
        }
    }
}
