//! One polling loop per monitored target, each independently pausable
//!
//! A loop waits while its target is paused, then records a heartbeat, runs the
//! target's collector and sleeps for the polling interval. Cycles of one target
//! never overlap. Pausing takes effect at the next wait check; an in-flight
//! collection is not interrupted.

use super::Collector;
use crate::error::{AgentError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{info, warn};
use meshgate_common::MetricKind;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
struct Heartbeat {
    at: Instant,
    wall: SystemTime,
}

/// Scheduling state of one target
struct WatchControl {
    paused: watch::Sender<bool>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl WatchControl {
    fn new(paused: bool) -> Self {
        let (paused, _) = watch::channel(paused);
        Self {
            paused,
            heartbeat: Mutex::new(None),
        }
    }

    fn beat(&self) {
        *self.heartbeat.lock() = Some(Heartbeat {
            at: Instant::now(),
            wall: SystemTime::now(),
        });
    }
}

pub struct WatchSupervisor {
    interval: Duration,
    cancel: CancellationToken,
    watches: DashMap<MetricKind, Arc<WatchControl>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WatchSupervisor {
    pub fn new(interval: Duration) -> Self {
        Self::with_cancellation(interval, CancellationToken::new())
    }

    /// Supervisor whose loops also stop when `cancel` fires
    pub fn with_cancellation(interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            interval,
            cancel,
            watches: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the polling loop for the collector's target.
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, collector: Arc<dyn Collector>, paused: bool) -> Result<()> {
        let target = collector.target();
        let control = match self.watches.entry(target) {
            Entry::Occupied(_) => return Err(AgentError::DuplicateTarget(target)),
            Entry::Vacant(slot) => slot.insert(Arc::new(WatchControl::new(paused))).clone(),
        };

        let handle = tokio::spawn(run_watch(
            collector,
            control,
            self.interval,
            self.cancel.clone(),
        ));
        self.tasks.lock().push(handle);

        info!(
            "Registered {} watch ({}, every {:?})",
            target,
            if paused { "paused" } else { "running" },
            self.interval
        );
        Ok(())
    }

    fn control(&self, target: MetricKind) -> Result<Arc<WatchControl>> {
        self.watches
            .get(&target)
            .map(|c| c.value().clone())
            .ok_or(AgentError::UnknownTarget(target))
    }

    /// RUNNING -> PAUSED; no-op if already paused
    pub fn pause(&self, target: MetricKind) -> Result<()> {
        let control = self.control(target)?;
        let changed = control.paused.send_if_modified(|paused| !std::mem::replace(paused, true));
        if changed {
            info!("Paused {} watch", target);
        }
        Ok(())
    }

    /// PAUSED -> RUNNING, waking the blocked loop; no-op if already running
    pub fn resume(&self, target: MetricKind) -> Result<()> {
        let control = self.control(target)?;
        let changed = control.paused.send_if_modified(|paused| std::mem::replace(paused, false));
        if changed {
            info!("Resumed {} watch", target);
        }
        Ok(())
    }

    pub fn is_paused(&self, target: MetricKind) -> Result<bool> {
        Ok(*self.control(target)?.paused.borrow())
    }

    /// Time since the target's last heartbeat, `None` if it never ran a cycle
    pub fn pausing_duration(&self, target: MetricKind) -> Result<Option<Duration>> {
        let control = self.control(target)?;
        let heartbeat = *control.heartbeat.lock();
        Ok(heartbeat.map(|h| h.at.elapsed()))
    }

    /// Wall-clock time of the target's last heartbeat
    pub fn last_heartbeat(&self, target: MetricKind) -> Result<Option<SystemTime>> {
        let control = self.control(target)?;
        let heartbeat = *control.heartbeat.lock();
        Ok(heartbeat.map(|h| h.wall))
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop all loops and wait for them to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Watch task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_watch(
    collector: Arc<dyn Collector>,
    control: Arc<WatchControl>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let target = collector.target();
    let mut paused = control.paused.subscribe();

    info!("Starting {} watch loop", target);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            running = async { paused.wait_for(|paused| !*paused).await.is_ok() } => {
                if !running {
                    break;
                }
            }
        }

        control.beat();

        if let Err(e) = collector.collect().await {
            warn!("{} collection cycle aborted: {}", target, e);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("{} watch loop stopped", target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCollector {
        target: MetricKind,
        runs: AtomicUsize,
        fail: bool,
    }

    impl CountingCollector {
        fn new(target: MetricKind) -> Arc<Self> {
            Arc::new(Self {
                target,
                runs: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing(target: MetricKind) -> Arc<Self> {
            Arc::new(Self {
                target,
                runs: AtomicUsize::new(0),
                fail: true,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Collector for CountingCollector {
        fn target(&self) -> MetricKind {
            self.target
        }

        async fn collect(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AgentError::Kubernetes("boom".to_string()));
            }
            Ok(())
        }
    }

    const INTERVAL: Duration = Duration::from_secs(2);

    #[tokio::test(start_paused = true)]
    async fn test_running_target_ticks_every_interval() {
        let supervisor = WatchSupervisor::new(INTERVAL);
        let collector = CountingCollector::new(MetricKind::NodeMetric);
        supervisor.spawn(collector.clone(), false).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(collector.runs(), 1);

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(collector.runs(), 2);

        assert!(!supervisor.is_paused(MetricKind::NodeMetric).unwrap());
        assert!(supervisor
            .pausing_duration(MetricKind::NodeMetric)
            .unwrap()
            .is_some());

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_target_never_beats() {
        let supervisor = WatchSupervisor::new(INTERVAL);
        let collector = CountingCollector::new(MetricKind::MultiClusterMetric);
        supervisor.spawn(collector.clone(), true).unwrap();

        tokio::time::sleep(INTERVAL * 10).await;

        assert_eq!(collector.runs(), 0);
        assert!(supervisor.is_paused(MetricKind::MultiClusterMetric).unwrap());
        assert_eq!(
            supervisor
                .pausing_duration(MetricKind::MultiClusterMetric)
                .unwrap(),
            None
        );
        assert_eq!(
            supervisor
                .last_heartbeat(MetricKind::MultiClusterMetric)
                .unwrap(),
            None
        );

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_runs_exactly_one_cycle_within_interval() {
        let supervisor = WatchSupervisor::new(INTERVAL);
        let collector = CountingCollector::new(MetricKind::MultiClusterMetric);
        supervisor.spawn(collector.clone(), true).unwrap();

        tokio::time::sleep(INTERVAL * 3).await;
        supervisor.resume(MetricKind::MultiClusterMetric).unwrap();
        supervisor.resume(MetricKind::MultiClusterMetric).unwrap();

        tokio::time::sleep(INTERVAL / 2).await;
        assert_eq!(collector.runs(), 1);
        assert!(supervisor
            .last_heartbeat(MetricKind::MultiClusterMetric)
            .unwrap()
            .is_some());

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_heartbeat() {
        let supervisor = WatchSupervisor::new(INTERVAL);
        let collector = CountingCollector::new(MetricKind::NodeMetric);
        supervisor.spawn(collector.clone(), false).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        supervisor.pause(MetricKind::NodeMetric).unwrap();
        supervisor.pause(MetricKind::NodeMetric).unwrap();
        let runs = collector.runs();

        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(collector.runs(), runs);

        let idle = supervisor
            .pausing_duration(MetricKind::NodeMetric)
            .unwrap()
            .unwrap();
        assert!(idle >= INTERVAL * 5);

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_keeps_loop_alive() {
        let supervisor = WatchSupervisor::new(INTERVAL);
        let collector = CountingCollector::failing(MetricKind::NodeMetric);
        supervisor.spawn(collector.clone(), false).unwrap();

        tokio::time::sleep(INTERVAL * 3 + Duration::from_millis(10)).await;
        assert_eq!(collector.runs(), 4);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_targets() {
        let supervisor = WatchSupervisor::new(INTERVAL);

        assert!(matches!(
            supervisor.pause(MetricKind::NodeMetric),
            Err(AgentError::UnknownTarget(MetricKind::NodeMetric))
        ));
        assert!(matches!(
            supervisor.is_paused(MetricKind::MultiClusterMetric),
            Err(AgentError::UnknownTarget(_))
        ));

        supervisor
            .spawn(CountingCollector::new(MetricKind::NodeMetric), true)
            .unwrap();
        assert!(matches!(
            supervisor.spawn(CountingCollector::new(MetricKind::NodeMetric), true),
            Err(AgentError::DuplicateTarget(MetricKind::NodeMetric))
        ));

        supervisor.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_spawns_register_target_once() {
        let supervisor = Arc::new(WatchSupervisor::new(INTERVAL));

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let supervisor = supervisor.clone();
                tokio::spawn(async move {
                    supervisor.spawn(CountingCollector::new(MetricKind::NodeMetric), true)
                })
            })
            .collect();

        let mut registered = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(()) => registered += 1,
                Err(e) => assert!(matches!(e, AgentError::DuplicateTarget(MetricKind::NodeMetric))),
            }
        }

        assert_eq!(registered, 1);
        assert_eq!(supervisor.tasks.lock().len(), 1);
        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_wakes_paused_loop() {
        let supervisor = WatchSupervisor::new(INTERVAL);
        supervisor
            .spawn(CountingCollector::new(MetricKind::NodeMetric), true)
            .unwrap();
        supervisor
            .spawn(CountingCollector::new(MetricKind::MultiClusterMetric), false)
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), supervisor.shutdown())
            .await
            .expect("loops stop on cancellation");
    }
}
