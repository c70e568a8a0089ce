//! Level-triggered event source for the reconciler.
//!
//! The dispatcher keeps one wake-up time per request. A periodic resync lists
//! all requests of the namespace, reaps orphaned state records and schedules
//! every request that has no wake-up yet or whose generation changed since the
//! last resync. Due requests are reconciled one at a
//! time, so two passes for the same request never overlap.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use debugmode_controller::state_store::reap_orphans;
use debugmode_controller::{
    Clock, DebugModeClient, DebugModeError, DebugModeReconciler, RecordBackend, RequestKey,
    Requeue, SystemClock,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::BackoffConfig;

pub struct Dispatcher {
    reconciler: Arc<DebugModeReconciler>,
    requests: Arc<dyn DebugModeClient>,
    records: Arc<dyn RecordBackend>,
    namespace: String,
    resync_interval: Duration,
    backoff: BackoffConfig,
    clock: Arc<dyn Clock>,
    schedule: BTreeMap<RequestKey, Instant>,
    failures: HashMap<RequestKey, ExponentialBackoff>,
    generations: HashMap<RequestKey, i64>,
}

impl Dispatcher {
    pub fn new(
        reconciler: Arc<DebugModeReconciler>,
        requests: Arc<dyn DebugModeClient>,
        records: Arc<dyn RecordBackend>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            reconciler,
            requests,
            records,
            namespace: namespace.into(),
            resync_interval: Duration::from_secs(300),
            backoff: BackoffConfig::default(),
            clock: Arc::new(SystemClock),
            schedule: BTreeMap::new(),
            failures: HashMap::new(),
            generations: HashMap::new(),
        }
    }

    pub fn with_resync_interval(mut self, resync_interval: Duration) -> Self {
        self.resync_interval = resync_interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Clock used to turn absolute deadlines into delays.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Next wake-up of `key`, if scheduled.
    pub fn scheduled_at(&self, key: &RequestKey) -> Option<Instant> {
        self.schedule.get(key).copied()
    }

    /// Schedule `key` to run as soon as possible.
    pub fn enqueue(&mut self, key: RequestKey) {
        self.schedule.insert(key, Instant::now());
    }

    /// List requests, reap orphaned state records and schedule newcomers and
    /// edited requests. Returns how many requests were scheduled.
    pub async fn resync(&mut self) -> Result<usize, DebugModeError> {
        let requests = self
            .requests
            .list(&self.namespace)
            .await
            .map_err(|e| {
                DebugModeError::backend(format!("list debug modes in {}", self.namespace), e)
            })?;

        let reaped = reap_orphans(self.records.as_ref(), &self.namespace, &requests).await?;
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), "reaped orphaned state records");
        }

        let now = Instant::now();
        let mut added = 0;
        let mut listed = HashSet::with_capacity(requests.len());
        for request in &requests {
            let key = request.key();
            let generation = request.metadata.generation;
            let edited = self
                .generations
                .insert(key.clone(), generation)
                .is_some_and(|seen| seen != generation);
            if edited {
                tracing::debug!(%key, generation, "debug mode edited, rescheduling");
                self.failures.remove(&key);
            }
            if edited || !self.schedule.contains_key(&key) {
                self.schedule.insert(key.clone(), now);
                added += 1;
            }
            listed.insert(key);
        }
        self.generations.retain(|key, _| listed.contains(key));

        tracing::debug!(requests = requests.len(), added, "resync finished");
        Ok(added)
    }

    /// Run every pass that is due, earliest first.
    pub async fn run_due(&mut self) {
        let now = Instant::now();
        let mut due: Vec<(Instant, RequestKey)> = self
            .schedule
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (*at, key.clone()))
            .collect();
        due.sort();

        for (_, key) in due {
            self.run_pass(key).await;
        }
    }

    /// Reconcile `key` once and reschedule it.
    ///
    /// Returns the delay until the next pass, `None` if the request needs no
    /// further passes for now.
    pub async fn run_pass(&mut self, key: RequestKey) -> Option<Duration> {
        self.schedule.remove(&key);
        let span = tracing::info_span!(
            "reconcile",
            namespace = %key.namespace,
            name = %key.name
        );
        let result = self.reconciler.reconcile(&key).instrument(span).await;

        let delay = match result {
            Ok(requeue) => {
                self.failures.remove(&key);
                match requeue {
                    Requeue::After(delay) => Some(delay),
                    Requeue::At(deadline) => Some(
                        (deadline - self.clock.now())
                            .to_std()
                            .unwrap_or(Duration::ZERO),
                    ),
                    Requeue::Done => None,
                }
            }
            Err(err) => {
                let delay = self.next_backoff(&key);
                tracing::warn!(
                    %key,
                    category = err.category().as_str(),
                    error = %err,
                    retry_in = ?delay,
                    "reconciliation failed, retrying"
                );
                Some(delay)
            }
        };

        if let Some(delay) = delay {
            self.schedule.insert(key, Instant::now() + delay);
        }
        delay
    }

    fn next_backoff(&mut self, key: &RequestKey) -> Duration {
        let backoff = &self.backoff;
        self.failures
            .entry(key.clone())
            .or_insert_with(|| {
                ExponentialBuilder::default()
                    .with_min_delay(backoff.min_delay())
                    .with_max_delay(backoff.max_delay())
                    .without_max_times()
                    .build()
            })
            .next()
            .unwrap_or_else(|| backoff.max_delay())
    }

    fn next_wakeup(&self) -> Instant {
        self.schedule
            .values()
            .min()
            .copied()
            .unwrap_or_else(|| Instant::now() + self.resync_interval)
    }

    /// Drive passes until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut resync = tokio::time::interval(self.resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            namespace = %self.namespace,
            resync_interval = ?self.resync_interval,
            "dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let wakeup = self.next_wakeup();

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = resync.tick() => {
                    if let Err(err) = self.resync().await {
                        tracing::warn!(
                            category = err.category().as_str(),
                            error = %err,
                            "resync failed"
                        );
                    }
                }
                _ = tokio::time::sleep_until(wakeup) => {
                    self.run_due().await;
                }
            }
        }

        tracing::info!(pending = self.schedule.len(), "dispatcher stopped");
    }
}
