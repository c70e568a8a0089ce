//! `debugmode-operator`: runs the debug-mode reconciler as a service.
//!
//! Wires the controller core to its surroundings: configuration, the
//! subscriber, the level-triggered [`dispatcher::Dispatcher`] and the
//! filesystem-backed [`local::LocalEcosystem`].

pub mod config;
pub mod dispatcher;
pub mod local;
pub mod logging;

use std::sync::Arc;

use debugmode_controller::handler::ComponentClient;
use debugmode_controller::{
    ComponentLogLevelHandler, DebugModeClient, DebugModeReconciler, DoguLogLevelHandler, Fleet,
    FleetMember, RecordBackend, TargetLister,
};

use crate::config::OperatorConfig;
use crate::dispatcher::Dispatcher;
use crate::local::LocalEcosystem;

/// Dogus and components of `ecosystem`, skipping the component `self_component`.
pub fn local_fleet(ecosystem: &LocalEcosystem, self_component: &str) -> Fleet {
    Fleet::new()
        .with_member(FleetMember::new(
            Arc::new(DoguLogLevelHandler::from_backend(Arc::clone(
                &ecosystem.dogus,
            ))),
            Arc::clone(&ecosystem.dogus) as Arc<dyn TargetLister>,
        ))
        .with_member(
            FleetMember::new(
                Arc::new(ComponentLogLevelHandler::new(
                    Arc::clone(&ecosystem.components) as Arc<dyn ComponentClient>
                )),
                Arc::clone(&ecosystem.components) as Arc<dyn TargetLister>,
            )
            .excluding(self_component),
        )
}

/// Reconciler and dispatcher over a local ecosystem, configured by `config`.
pub fn local_dispatcher(config: &OperatorConfig, ecosystem: &LocalEcosystem) -> Dispatcher {
    let reconciler = DebugModeReconciler::new(
        Arc::clone(&ecosystem.requests) as Arc<dyn DebugModeClient>,
        Arc::clone(&ecosystem.records) as Arc<dyn RecordBackend>,
        local_fleet(ecosystem, &config.self_component),
    )
    .with_poll_interval(config.poll_interval());

    Dispatcher::new(
        Arc::new(reconciler),
        Arc::clone(&ecosystem.requests) as Arc<dyn DebugModeClient>,
        Arc::clone(&ecosystem.records) as Arc<dyn RecordBackend>,
        config.namespace.clone(),
    )
    .with_resync_interval(config.resync_interval())
    .with_backoff(config.backoff.clone())
}
