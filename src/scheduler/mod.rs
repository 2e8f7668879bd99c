//! Minimal periodic-job scheduler: named jobs on fixed intervals,
//! polled on a short tick, executed sequentially.
//!
//! Jobs never run concurrently with each other; a slow job delays the
//! next poll of every job. Accepted limitation of this design.

use std::time::{Duration, Instant};

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{error, info};

pub type JobAction = Box<dyn FnMut() -> BoxFuture<'static, Result<()>> + Send>;

/// A named job with its own fixed interval. Invoked at most once per
/// poll tick, and only once at least `interval` has elapsed since its
/// last invocation.
pub struct SchedulerJob {
    name: String,
    interval: Duration,
    action: JobAction,
    last_run: Option<Instant>,
}

impl SchedulerJob {
    pub fn new(name: impl Into<String>, interval: Duration, action: JobAction) -> Self {
        Self {
            name: name.into(),
            interval,
            action,
            last_run: None,
        }
    }
}

/// Stops the scheduler loop. The loop observes the signal within one
/// poll tick.
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Scheduler {
    jobs: Vec<SchedulerJob>,
    poll_interval: Duration,
    stop_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(poll_interval: Duration) -> (Self, StopHandle) {
        let (tx, stop_rx) = watch::channel(false);
        (
            Self {
                jobs: Vec::new(),
                poll_interval,
                stop_rx,
            },
            StopHandle { tx },
        )
    }

    /// Register a job. Call before `run`; a freshly registered job is
    /// due on the first poll.
    pub fn register(&mut self, job: SchedulerJob) {
        info!(job = %job.name, interval_secs = job.interval.as_secs(), "registered background job");
        self.jobs.push(job);
    }

    /// Poll until the stop handle fires. A failing job is logged and the
    /// loop moves on; a permanently failing job never crashes the
    /// process.
    pub async fn run(self) {
        let Scheduler {
            mut jobs,
            poll_interval,
            mut stop_rx,
        } = self;

        info!(jobs = jobs.len(), "scheduler started");
        let mut tick = tokio::time::interval(poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now = Instant::now();
                    for job in jobs.iter_mut() {
                        let due = job
                            .last_run
                            .map_or(true, |last| now.duration_since(last) >= job.interval);
                        if !due {
                            continue;
                        }
                        // Mark as run before executing to prevent double-scheduling
                        job.last_run = Some(now);
                        if let Err(e) = (job.action)().await {
                            error!(job = %job.name, "background job failed: {e:#}");
                        }
                    }
                }
                _ = stop_rx.changed() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }
}
