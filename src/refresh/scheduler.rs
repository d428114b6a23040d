//! Background refresh.
//!
//! Two tasks cooperate over a channel:
//!
//! ```text
//!   ticker ──(every interval: all scheduled targets)──┐
//!                                                    ├──> mpsc ──> consumer ──> ensure_fresh
//!   trigger_background_refresh(key) ─────────────────┘               │
//!                                                        semaphore(concurrency)
//! ```
//!
//! The consumer goes through the same [`BuildCoordinator`] as queries, so a
//! background refresh and an on-demand one for the same identity share one
//! build. Failed keys back off exponentially; ticks skip them until their
//! next attempt is due.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::coordinator::BuildCoordinator;
use super::instance::InstanceKey;
use super::target::BuildTarget;
use crate::config::{RetrySettings, Settings, SettingsError};
use crate::model::LocationKind;
use crate::semantic::Catalog;

const QUEUE_CAPACITY: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("refresh queue is full")]
    QueueFull,

    #[error("refresh scheduler is stopped")]
    Stopped,
}

/// Exponential backoff between failed refreshes of one key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Result<Self, SettingsError> {
        Ok(Self {
            initial_backoff: settings.initial_backoff()?,
            max_backoff: settings.max_backoff()?,
            multiplier: settings.multiplier,
        })
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(64) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    failures: u32,
    next_attempt: Instant,
}

#[derive(Debug, Clone)]
struct RefreshRequest {
    key: InstanceKey,
    /// Manual triggers ignore backoff.
    forced: bool,
}

struct Shared {
    coordinator: BuildCoordinator,
    catalog: watch::Receiver<Arc<Catalog>>,
    default_location: LocationKind,
    retry: RetryPolicy,
    retries: DashMap<InstanceKey, RetryState>,
    permits: Arc<Semaphore>,
}

/// Starts the background refresh tasks.
pub struct RefreshScheduler;

impl RefreshScheduler {
    /// Spawn the ticker and consumer tasks.
    ///
    /// `catalog` follows schema reloads; each tick reads the latest value.
    pub fn start(
        coordinator: BuildCoordinator,
        catalog: watch::Receiver<Arc<Catalog>>,
        settings: &Settings,
    ) -> Result<SchedulerHandle, SettingsError> {
        settings.validate()?;
        let interval = settings.refresh.background_interval()?;
        let shared = Arc::new(Shared {
            coordinator,
            catalog,
            default_location: settings.storage.default_location()?,
            retry: RetryPolicy::from_settings(&settings.refresh.retry)?,
            retries: DashMap::new(),
            permits: Arc::new(Semaphore::new(settings.refresh.concurrency)),
        });
        let (requests_tx, requests_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let ticker = tokio::spawn(tick_loop(
            shared.clone(),
            interval,
            requests_tx.clone(),
            stop_rx.clone(),
        ));
        let consumer = tokio::spawn(consume_loop(shared.clone(), requests_rx, stop_rx));
        info!(?interval, concurrency = settings.refresh.concurrency, "background refresh started");

        Ok(SchedulerHandle {
            shared,
            requests: requests_tx,
            stop: stop_tx,
            tasks: vec![ticker, consumer],
        })
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    requests: mpsc::Sender<RefreshRequest>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Queue a refresh of `key`, bypassing any backoff.
    pub fn trigger_background_refresh(&self, key: InstanceKey) -> Result<(), SchedulerError> {
        self.requests
            .try_send(RefreshRequest { key, forced: true })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SchedulerError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SchedulerError::Stopped,
            })
    }

    /// Instances whose last background refresh failed, ordered by key.
    pub fn backing_off(&self) -> Vec<InstanceKey> {
        let mut keys: Vec<InstanceKey> = self.shared.retries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Stop both tasks. Refreshes already running finish on their own.
    pub async fn shutdown(self) {
        self.stop.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "refresh task ended abnormally");
            }
        }
        info!("background refresh stopped");
    }
}

async fn tick_loop(
    shared: Arc<Shared>,
    interval: Duration,
    requests: mpsc::Sender<RefreshRequest>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                for key in shared.due_targets(Instant::now()) {
                    let request = RefreshRequest { key, forced: false };
                    if requests.send(request).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn consume_loop(
    shared: Arc<Shared>,
    mut requests: mpsc::Receiver<RefreshRequest>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            _ = stop.changed() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        if !request.forced && !shared.due(&request.key, Instant::now()) {
            continue;
        }
        let catalog = shared.catalog.borrow().clone();
        let Some(target) = BuildTarget::resolve(&catalog, &request.key, shared.default_location) else {
            warn!(instance = %request.key, "refresh requested for unknown pre-aggregation");
            continue;
        };
        let permit = tokio::select! {
            _ = stop.changed() => break,
            permit = shared.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let shared = shared.clone();
        tokio::spawn(async move {
            let _permit = permit;
            shared.refresh(&target).await;
        });
    }
}

impl Shared {
    /// Scheduled targets out of backoff. Backoff state of targets no
    /// longer scheduled is dropped.
    fn due_targets(&self, now: Instant) -> Vec<InstanceKey> {
        let catalog = self.catalog.borrow().clone();
        let scheduled: Vec<InstanceKey> = BuildTarget::scheduled(&catalog, self.default_location)
            .into_iter()
            .map(|target| target.key)
            .collect();
        self.retries.retain(|key, _| scheduled.contains(key));
        scheduled
            .into_iter()
            .filter(|key| {
                let due = self.due(key, now);
                if !due {
                    debug!(instance = %key, "skipping refresh in backoff");
                }
                due
            })
            .collect()
    }

    fn due(&self, key: &InstanceKey, now: Instant) -> bool {
        self.retries
            .get(key)
            .map_or(true, |state| state.next_attempt <= now)
    }

    async fn refresh(&self, target: &BuildTarget) {
        match self.coordinator.ensure_fresh(target).await {
            Ok(instance) => {
                if self.retries.remove(&target.key).is_some() {
                    info!(instance = %target.key, "refresh recovered");
                }
                debug!(instance = %target.key, table = %instance.location, "refresh complete");
            }
            Err(e) => {
                let failures = self
                    .retries
                    .get(&target.key)
                    .map_or(0, |state| state.failures)
                    + 1;
                let delay = self.retry.backoff(failures);
                self.retries.insert(
                    target.key.clone(),
                    RetryState {
                        failures,
                        next_attempt: Instant::now() + delay,
                    },
                );
                warn!(instance = %target.key, error = %e, failures, retry_in = ?delay, "background refresh failed");
            }
        }
    }
}
