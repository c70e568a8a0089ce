#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end debug sessions against in-memory collaborators.
//!
//! Each test drives the reconciler pass by pass with a pinned clock and checks
//! the observable side effects: target levels, restarts, the fallback record
//! and the request status.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use debugmode_controller::clock::MockClock;
use debugmode_controller::handler::ComponentClient;
use debugmode_controller::memory::{
    InMemoryComponents, InMemoryDogus, InMemoryRecords, InMemoryRequests, request,
};
use debugmode_controller::state_store::STATE_RECORD_NAME;
use debugmode_controller::{
    Clock, ComponentLogLevelHandler, ConditionType, DebugModeClient, DebugModeReconciler,
    DoguLogLevelHandler, Fleet, FleetMember, LogLevel, Phase, RecordBackend, RequestKey, Requeue,
    SELF_COMPONENT_NAME, TargetLister,
};
use pretty_assertions::assert_eq;

const POLL: Duration = Duration::from_secs(60);

fn at(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
}

fn deadline() -> DateTime<Utc> {
    at("2026-03-01T12:00:00Z")
}

struct Session {
    requests: Arc<InMemoryRequests>,
    records: Arc<InMemoryRecords>,
    dogus: Arc<InMemoryDogus>,
    components: Arc<InMemoryComponents>,
    clock: Arc<MockClock>,
    reconciler: DebugModeReconciler,
    key: RequestKey,
}

impl Session {
    fn new(target_log_level: &str) -> Self {
        let requests = Arc::new(InMemoryRequests::new());
        let records = Arc::new(InMemoryRecords::new());
        let dogus = Arc::new(InMemoryDogus::new());
        let components = Arc::new(InMemoryComponents::new());
        let clock = Arc::new(MockClock::new(at("2026-03-01T10:00:00Z")));

        let fleet = Fleet::new()
            .with_member(FleetMember::new(
                Arc::new(DoguLogLevelHandler::from_backend(Arc::clone(&dogus))),
                Arc::clone(&dogus) as Arc<dyn TargetLister>,
            ))
            .with_member(
                FleetMember::new(
                    Arc::new(ComponentLogLevelHandler::new(
                        Arc::clone(&components) as Arc<dyn ComponentClient>
                    )),
                    Arc::clone(&components) as Arc<dyn TargetLister>,
                )
                .excluding(SELF_COMPONENT_NAME),
            );

        let reconciler = DebugModeReconciler::new(
            Arc::clone(&requests) as Arc<dyn DebugModeClient>,
            Arc::clone(&records) as Arc<dyn RecordBackend>,
            fleet,
        )
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .with_poll_interval(POLL);

        let debug = request("ecosystem", "debug", target_log_level, deadline());
        let key = debug.key();
        requests.insert(debug);

        Self {
            requests,
            records,
            dogus,
            components,
            clock,
            reconciler,
            key,
        }
    }

    async fn pass(&self) -> Requeue {
        self.reconciler.reconcile(&self.key).await.unwrap()
    }

    fn phase(&self) -> Option<Phase> {
        self.requests.request(&self.key).unwrap().status.phase
    }

    fn condition(&self, type_: ConditionType) -> Option<(bool, String)> {
        self.requests
            .request(&self.key)
            .unwrap()
            .status
            .condition(type_)
            .map(|c| (c.status, c.reason.clone()))
    }

    fn fallback(&self, key: &str) -> Option<String> {
        self.records
            .record("ecosystem", STATE_RECORD_NAME)
            .and_then(|record| record.data.get(key).cloned())
    }
}

#[tokio::test]
async fn scenario_a_activation_captures_and_converges() {
    let s = Session::new("DEBUG");
    s.dogus.insert("doguA", Some(LogLevel::Info), None);
    s.dogus.insert("doguB", Some(LogLevel::Warn), None);

    assert_eq!(s.pass().await, Requeue::After(POLL));

    assert_eq!(s.fallback("dogu.doguA").as_deref(), Some("INFO"));
    assert_eq!(s.fallback("dogu.doguB").as_deref(), Some("WARN"));
    assert_eq!(s.dogus.configured_level("doguA"), Some(LogLevel::Debug));
    assert_eq!(s.dogus.configured_level("doguB"), Some(LogLevel::Debug));
    assert_eq!(
        s.dogus.restarts(),
        vec!["doguA".to_string(), "doguB".to_string()]
    );
    assert_eq!(s.phase(), Some(Phase::Set));
    assert_eq!(
        s.condition(ConditionType::LogLevelSet),
        Some((false, "Set".to_string()))
    );
}

#[tokio::test]
async fn scenario_b_converged_fleet_waits_for_deadline() {
    let s = Session::new("DEBUG");
    s.dogus.insert("doguA", Some(LogLevel::Debug), None);
    s.dogus.insert("doguB", Some(LogLevel::Debug), None);

    assert_eq!(s.pass().await, Requeue::At(deadline()));

    assert_eq!(s.dogus.config_writes(), 0);
    assert!(s.dogus.restarts().is_empty());
    assert_eq!(s.phase(), Some(Phase::WaitForRollback));
    assert_eq!(
        s.condition(ConditionType::LogLevelSet),
        Some((true, "Set".to_string()))
    );
}

#[tokio::test]
async fn scenario_c_rollback_restores_then_completes() {
    let s = Session::new("DEBUG");
    s.dogus.insert("doguA", Some(LogLevel::Info), None);
    s.dogus.insert("doguB", Some(LogLevel::Warn), None);
    assert_eq!(s.pass().await, Requeue::After(POLL));
    assert_eq!(s.pass().await, Requeue::At(deadline()));
    let restarts_during_activation = s.dogus.restarts().len();

    s.clock.set(deadline());
    assert_eq!(s.pass().await, Requeue::After(POLL));
    assert_eq!(s.phase(), Some(Phase::Rollback));
    assert_eq!(s.dogus.configured_level("doguA"), Some(LogLevel::Info));
    assert_eq!(s.dogus.configured_level("doguB"), Some(LogLevel::Warn));
    assert_eq!(s.dogus.restarts().len(), restarts_during_activation + 2);
    assert_eq!(
        s.condition(ConditionType::Deactivated),
        Some((false, "Rollback".to_string()))
    );

    s.clock.advance(chrono::Duration::seconds(60));
    assert_eq!(s.pass().await, Requeue::Done);
    assert_eq!(s.phase(), Some(Phase::Completed));
    assert!(s.records.record("ecosystem", STATE_RECORD_NAME).is_none());
    assert_eq!(s.records.delete_count(), 1);
    assert_eq!(
        s.condition(ConditionType::Deactivated),
        Some((true, "Rollback".to_string()))
    );
    assert_eq!(
        s.condition(ConditionType::LogLevelSet),
        Some((false, "Completed".to_string()))
    );

    // Later invocations leave the finished session alone.
    let writes = s.requests.status_writes();
    assert_eq!(s.pass().await, Requeue::Done);
    assert_eq!(s.requests.status_writes(), writes);
    assert_eq!(s.records.create_count(), 1);
}

#[tokio::test]
async fn scenario_d_component_added_mid_session_is_captured() {
    let s = Session::new("debug");
    s.dogus.insert("doguA", Some(LogLevel::Info), None);
    assert_eq!(s.pass().await, Requeue::After(POLL));
    assert_eq!(s.pass().await, Requeue::At(deadline()));

    s.components.insert("k8s-loki", Some("warn"));
    s.clock.advance(chrono::Duration::minutes(10));
    assert_eq!(s.pass().await, Requeue::After(POLL));

    assert_eq!(s.fallback("component.k8s-loki").as_deref(), Some("WARN"));
    assert_eq!(s.components.mapped_level("k8s-loki").as_deref(), Some("debug"));
    assert_eq!(s.fallback("dogu.doguA").as_deref(), Some("INFO"));
    assert_eq!(s.phase(), Some(Phase::Set));

    assert_eq!(s.pass().await, Requeue::At(deadline()));
    assert_eq!(s.phase(), Some(Phase::WaitForRollback));

    s.clock.set(deadline());
    assert_eq!(s.pass().await, Requeue::After(POLL));
    assert_eq!(s.components.mapped_level("k8s-loki").as_deref(), Some("warn"));
    assert_eq!(s.pass().await, Requeue::Done);
}

#[tokio::test]
async fn operator_never_debugs_itself() {
    let s = Session::new("DEBUG");
    s.components.insert(SELF_COMPONENT_NAME, Some("info"));

    assert_eq!(s.pass().await, Requeue::At(deadline()));
    assert_eq!(
        s.components.mapped_level(SELF_COMPONENT_NAME).as_deref(),
        Some("info")
    );
    assert_eq!(s.fallback(&format!("component.{SELF_COMPONENT_NAME}")), None);
}

#[tokio::test]
async fn rollback_without_capture_fails_the_request() {
    let s = Session::new("DEBUG");
    s.dogus.insert("doguA", Some(LogLevel::Debug), None);
    s.clock.set(deadline());

    let err = s.reconciler.reconcile(&s.key).await.unwrap_err();
    assert_eq!(err.category().as_str(), "CONSISTENCY_ERROR");
    assert_eq!(s.phase(), Some(Phase::Failed));
}

#[tokio::test]
async fn deleted_request_ends_the_session_quietly() {
    let s = Session::new("DEBUG");
    s.dogus.insert("doguA", Some(LogLevel::Info), None);
    assert_eq!(s.pass().await, Requeue::After(POLL));

    s.requests.remove(&s.key);
    assert_eq!(s.pass().await, Requeue::Done);
    assert_eq!(s.dogus.configured_level("doguA"), Some(LogLevel::Debug));
}
