//! Phase state machine driving one reconciliation pass per invocation.
//!
//! ```text
//!   now < deactivateAt:  Set ──(converged)──▶ WaitForRollback ──▶ requeue at deadline
//!   now ≥ deactivateAt:  Rollback ──(converged)──▶ Completed (store destroyed)
//!   any error:           Failed, error handed back to the dispatcher
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::DEFAULT_POLL_INTERVAL;
use crate::clock::{Clock, SystemClock};
use crate::convergence::{ConvergenceEngine, Direction};
use crate::error::{DebugModeError, Result};
use crate::fleet::Fleet;
use crate::loglevel::LogLevel;
use crate::request::{
    Condition, ConditionType, DebugModeClient, DebugModeRequest, DebugModeStatus, Phase,
    RequestKey,
};
use crate::state_store::{RecordBackend, StateStore};

pub const REASON_SET: &str = "Set";
pub const REASON_ROLLBACK: &str = "Rollback";
pub const REASON_COMPLETED: &str = "Completed";

const MSG_ACTIVATING: &str = "Activating debug mode in progress";
const MSG_ACTIVATED: &str = "Debug mode activated";
const MSG_DEACTIVATING: &str = "Deactivating debug mode in progress";
const MSG_DEACTIVATED: &str = "Debug mode deactivated";
const MSG_COMPLETED: &str = "Debug mode completed, log levels restored";

/// When the dispatcher should run the next pass for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Targets are still converging.
    After(Duration),
    /// Nothing to do until the deadline.
    At(DateTime<Utc>),
    /// The session is over or the request is gone.
    Done,
}

/// Reconciles `DebugMode` requests against the fleet.
pub struct DebugModeReconciler {
    requests: Arc<dyn DebugModeClient>,
    records: Arc<dyn RecordBackend>,
    fleet: Fleet,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl DebugModeReconciler {
    pub fn new(
        requests: Arc<dyn DebugModeClient>,
        records: Arc<dyn RecordBackend>,
        fleet: Fleet,
    ) -> Self {
        Self {
            requests,
            records,
            fleet,
            clock: Arc::new(SystemClock),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run one pass for `key`.
    ///
    /// On error the request is moved to `Failed` on a best-effort basis and the
    /// original error is returned.
    pub async fn reconcile(&self, key: &RequestKey) -> Result<Requeue> {
        let fetched = self.requests.get(key).await.map_err(|e| {
            DebugModeError::backend(format!("get debug mode {key}"), e)
        })?;
        let Some(mut request) = fetched else {
            tracing::debug!(%key, "debug mode not found, nothing to do");
            return Ok(Requeue::Done);
        };

        let now = self.clock.now();
        if !request.is_active_at(now) && request.status.phase == Some(Phase::Completed) {
            tracing::debug!(%key, "debug mode already completed");
            return Ok(Requeue::Done);
        }

        match self.pass(&mut request, now).await {
            Ok(requeue) => Ok(requeue),
            Err(err) => {
                tracing::error!(
                    %key,
                    category = err.category().as_str(),
                    error = %err,
                    "debug mode reconciliation failed"
                );
                self.mark_failed(&mut request).await;
                Err(err)
            }
        }
    }

    async fn pass(&self, request: &mut DebugModeRequest, now: DateTime<Utc>) -> Result<Requeue> {
        let mut store = StateStore::open(Arc::clone(&self.records), request).await?;
        if request.is_active_at(now) {
            self.activate(request, &mut store, now).await
        } else {
            self.deactivate(request, store, now).await
        }
    }

    async fn activate(
        &self,
        request: &mut DebugModeRequest,
        store: &mut StateStore,
        now: DateTime<Utc>,
    ) -> Result<Requeue> {
        self.set_phase(request, Phase::Set).await?;
        self.set_condition(
            request,
            Condition::new(
                ConditionType::LogLevelSet,
                false,
                REASON_SET,
                MSG_ACTIVATING,
                now,
            ),
        )
        .await?;

        let target = target_level(&request.spec.target_log_level)?;
        let kinds = self.fleet.enumerate().await?;
        let changed = ConvergenceEngine::new(Direction::Activate { target })
            .run(&kinds, store)
            .await?;
        if changed {
            tracing::info!(key = %request.key(), %target, "log levels changed, waiting for targets");
            return Ok(Requeue::After(self.poll_interval));
        }

        self.set_condition(
            request,
            Condition::new(
                ConditionType::LogLevelSet,
                true,
                REASON_SET,
                MSG_ACTIVATED,
                now,
            ),
        )
        .await?;
        self.set_phase(request, Phase::WaitForRollback).await?;
        Ok(Requeue::At(request.spec.deactivate_timestamp))
    }

    async fn deactivate(
        &self,
        request: &mut DebugModeRequest,
        mut store: StateStore,
        now: DateTime<Utc>,
    ) -> Result<Requeue> {
        self.set_phase(request, Phase::Rollback).await?;
        self.set_condition(
            request,
            Condition::new(
                ConditionType::Deactivated,
                false,
                REASON_ROLLBACK,
                MSG_DEACTIVATING,
                now,
            ),
        )
        .await?;

        let kinds = self.fleet.enumerate().await?;
        let changed = ConvergenceEngine::new(Direction::Deactivate)
            .run(&kinds, &mut store)
            .await?;
        if changed {
            tracing::info!(key = %request.key(), "log levels restored, waiting for targets");
            return Ok(Requeue::After(self.poll_interval));
        }

        store.destroy().await?;

        // Completion goes out as a single status write once the store is gone.
        let mut status = request.status.clone();
        status.upsert_condition(Condition::new(
            ConditionType::Deactivated,
            true,
            REASON_ROLLBACK,
            MSG_DEACTIVATED,
            now,
        ));
        status.upsert_condition(Condition::new(
            ConditionType::LogLevelSet,
            false,
            REASON_COMPLETED,
            MSG_COMPLETED,
            now,
        ));
        status.phase = Some(Phase::Completed);
        self.write_status(request, status).await?;
        tracing::info!(key = %request.key(), "debug mode completed");
        Ok(Requeue::Done)
    }

    async fn set_phase(&self, request: &mut DebugModeRequest, phase: Phase) -> Result<()> {
        if request.status.phase == Some(phase) {
            return Ok(());
        }
        let mut status = request.status.clone();
        status.phase = Some(phase);
        self.write_status(request, status).await?;
        tracing::info!(key = %request.key(), %phase, "phase changed");
        Ok(())
    }

    async fn set_condition(&self, request: &mut DebugModeRequest, condition: Condition) -> Result<()> {
        let mut status = request.status.clone();
        if !status.upsert_condition(condition) {
            return Ok(());
        }
        self.write_status(request, status).await
    }

    async fn write_status(
        &self,
        request: &mut DebugModeRequest,
        status: DebugModeStatus,
    ) -> Result<()> {
        let mut desired = request.clone();
        desired.status = status;
        *request = self.requests.update_status(&desired).await.map_err(|e| {
            DebugModeError::backend(format!("update status of debug mode {}", desired.key()), e)
        })?;
        Ok(())
    }

    async fn mark_failed(&self, request: &mut DebugModeRequest) {
        if let Err(err) = self.set_phase(request, Phase::Failed).await {
            tracing::warn!(key = %request.key(), error = %err, "could not mark debug mode as failed");
        }
    }
}

fn target_level(value: &str) -> Result<LogLevel> {
    LogLevel::parse(value).map_err(|_| DebugModeError::InvalidTargetLevel {
        value: value.to_string(),
    })
}
