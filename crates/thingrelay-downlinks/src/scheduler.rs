//! Downlink scheduling.
//!
//! Each scheduled downlink owns one task. One-time tasks sleep until their
//! instant, run once and forget themselves; repeating tasks walk their cron
//! schedule and start every run detached so a slow endpoint never delays the
//! next tick. The task table is keyed by downlink id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{Downlink, Trigger};

/// Whatever a fired task does with its downlink.
#[async_trait]
pub trait DownlinkRunner: Send + Sync {
    async fn run(&self, downlink: &Downlink);
}

struct Task {
    generation: u64,
    cancel: CancellationToken,
}

type TaskTable = Arc<Mutex<HashMap<String, Task>>>;

pub struct DownlinkScheduler {
    runner: Arc<dyn DownlinkRunner>,
    tasks: TaskTable,
    shutdown: CancellationToken,
    generation: AtomicU64,
    fired: Arc<AtomicU64>,
}

impl DownlinkScheduler {
    pub fn new(runner: Arc<dyn DownlinkRunner>) -> Self {
        Self {
            runner,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            generation: AtomicU64::new(0),
            fired: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule a downlink, replacing any task it already has.
    ///
    /// Returns `false` without scheduling when a one-time instant has already
    /// passed or the scheduler is stopped.
    pub fn schedule(&self, downlink: Downlink) -> Result<bool> {
        let trigger = downlink.scheduler.trigger()?;
        let tz = downlink.scheduler.timezone()?;
        self.unschedule(&downlink.id);

        if self.shutdown.is_cancelled() {
            debug!(downlink_id = %downlink.id, "Scheduler stopped, not scheduling");
            return Ok(false);
        }

        let cancel = self.shutdown.child_token();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let id = downlink.id.clone();

        // Spawn under the table lock so a one-time task cannot remove its
        // entry before it is inserted.
        let mut tasks = self.tasks.lock();
        match trigger {
            Trigger::Once(at) => {
                if at <= Utc::now() {
                    debug!(downlink_id = %id, at = %at, "One-time downlink is in the past, skipping");
                    return Ok(false);
                }
                tokio::spawn(run_once(
                    downlink,
                    at,
                    generation,
                    cancel.clone(),
                    self.runner.clone(),
                    self.tasks.clone(),
                    self.fired.clone(),
                ));
            }
            Trigger::Repeating(schedule) => {
                tokio::spawn(run_repeating(
                    downlink,
                    *schedule,
                    tz,
                    cancel.clone(),
                    self.runner.clone(),
                    self.fired.clone(),
                ));
            }
        }
        tasks.insert(id.clone(), Task { generation, cancel });
        info!(downlink_id = %id, "Downlink scheduled");
        Ok(true)
    }

    /// Stop and forget a downlink's task. Returns whether one existed.
    pub fn unschedule(&self, id: &str) -> bool {
        match self.tasks.lock().remove(id) {
            Some(task) => {
                task.cancel.cancel();
                debug!(downlink_id = %id, "Downlink unscheduled");
                true
            }
            None => false,
        }
    }

    /// Cancel every task. Later calls to [`schedule`](Self::schedule) are no-ops.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let drained: Vec<(String, Task)> = self.tasks.lock().drain().collect();
        info!(count = drained.len(), "Downlink scheduler stopped");
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.tasks.lock().contains_key(id)
    }

    pub fn scheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of times any task has fired.
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }
}

impl Drop for DownlinkScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn until(at: DateTime<Utc>) -> std::time::Duration {
    (at - Utc::now()).to_std().unwrap_or_default()
}

async fn run_once(
    downlink: Downlink,
    at: DateTime<Utc>,
    generation: u64,
    cancel: CancellationToken,
    runner: Arc<dyn DownlinkRunner>,
    tasks: TaskTable,
    fired: Arc<AtomicU64>,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(until(at)) => {}
    }

    {
        let mut tasks = tasks.lock();
        if tasks.get(&downlink.id).map(|t| t.generation) == Some(generation) {
            tasks.remove(&downlink.id);
        }
    }

    fired.fetch_add(1, Ordering::Relaxed);
    debug!(downlink_id = %downlink.id, "One-time downlink fired");
    runner.run(&downlink).await;
}

async fn run_repeating(
    downlink: Downlink,
    schedule: Schedule,
    tz: Tz,
    cancel: CancellationToken,
    runner: Arc<dyn DownlinkRunner>,
    fired: Arc<AtomicU64>,
) {
    let downlink = Arc::new(downlink);
    let mut cursor = Utc::now();

    loop {
        let from = cursor.max(Utc::now()).with_timezone(&tz);
        let Some(next) = schedule.after(&from).next() else {
            debug!(downlink_id = %downlink.id, "Schedule exhausted");
            return;
        };
        let next = next.with_timezone(&Utc);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(until(next)) => {}
        }
        cursor = next;

        fired.fetch_add(1, Ordering::Relaxed);
        let runner = runner.clone();
        let downlink = downlink.clone();
        tokio::spawn(async move { runner.run(&downlink).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Frequency, Scheduler};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingRunner {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl DownlinkRunner for CountingRunner {
        async fn run(&self, _downlink: &Downlink) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn once_at(id: &str, at: DateTime<Utc>) -> Downlink {
        Downlink {
            id: id.into(),
            url: "http://h/".into(),
            scheduler: Scheduler {
                time_zone: "UTC".into(),
                frequency: Frequency::Once,
                date_time: at.format("%Y-%m-%d %H:%M:%S").to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn minutely(id: &str) -> Downlink {
        Downlink {
            id: id.into(),
            url: "http://h/".into(),
            scheduler: Scheduler {
                frequency: Frequency::Minutely,
                minute: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_one_time_is_skipped() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = DownlinkScheduler::new(runner.clone());

        let past = once_at("d1", Utc::now() - chrono::Duration::hours(1));
        assert!(!scheduler.schedule(past).unwrap());
        assert!(scheduler.scheduled_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_time_fires_once() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = DownlinkScheduler::new(runner.clone());

        let future = once_at("d1", Utc::now() + chrono::Duration::seconds(10));
        assert!(scheduler.schedule(future).unwrap());
        assert_eq!(scheduler.scheduled_ids(), vec!["d1".to_string()]);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.fired_count(), 1);
        assert!(!scheduler.is_scheduled("d1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unschedule_cancels_timer() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = DownlinkScheduler::new(runner.clone());

        scheduler
            .schedule(once_at("d1", Utc::now() + chrono::Duration::seconds(10)))
            .unwrap();
        assert!(scheduler.unschedule("d1"));
        assert!(!scheduler.unschedule("d1"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_keeps_firing_until_stopped() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = DownlinkScheduler::new(runner.clone());

        assert!(scheduler.schedule(minutely("d1")).unwrap());
        tokio::time::sleep(Duration::from_secs(200)).await;
        let fired = scheduler.fired_count();
        assert!(fired >= 3, "fired {} times", fired);
        assert!(scheduler.is_scheduled("d1"));

        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(scheduler.fired_count(), fired);
        assert!(!scheduler.schedule(minutely("d2")).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_task() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = DownlinkScheduler::new(runner.clone());

        scheduler.schedule(minutely("d1")).unwrap();
        scheduler
            .schedule(once_at("d1", Utc::now() + chrono::Duration::seconds(10)))
            .unwrap();
        assert_eq!(scheduler.scheduled_ids().len(), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(scheduler.fired_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_rejected() {
        let scheduler = DownlinkScheduler::new(Arc::new(CountingRunner::default()));
        let mut d = minutely("d1");
        d.scheduler.minute = 0;
        assert!(scheduler.schedule(d).is_err());
    }
}
