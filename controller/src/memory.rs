//! In-memory collaborators.
//!
//! Every backend records the calls that matter for assertions (writes,
//! restarts, record creations) and can be told to fail a class of calls.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BackendError;
use crate::fleet::TargetLister;
use crate::handler::{
    Component, ComponentClient, ConfigurationField, DoguConfig, DoguConfigRepository,
    DoguDescriptor, DoguDescriptorGetter, DoguRestarter, LOGGING_KEY, MAPPED_LOG_LEVEL_KEY,
};
use crate::loglevel::LogLevel;
use crate::request::{
    DebugModeClient, DebugModeRequest, DebugModeSpec, DebugModeStatus, ObjectMeta, RequestKey,
};
use crate::state_store::{RecordBackend, StateRecord};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn injected(failure: &Option<String>) -> Result<(), BackendError> {
    match failure {
        Some(message) => Err(BackendError::new(message.clone())),
        None => Ok(()),
    }
}

/// A fresh request with a deterministic uid and empty status.
pub fn request(
    namespace: &str,
    name: &str,
    target_log_level: &str,
    deactivate_timestamp: DateTime<Utc>,
) -> DebugModeRequest {
    DebugModeRequest {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: format!("{namespace}-{name}-uid"),
            generation: 1,
        },
        spec: DebugModeSpec {
            target_log_level: target_log_level.to_string(),
            deactivate_timestamp,
        },
        status: DebugModeStatus::default(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dogus
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DogusState {
    configs: BTreeMap<String, DoguConfig>,
    descriptors: BTreeMap<String, DoguDescriptor>,
    restarts: Vec<String>,
    config_writes: usize,
    list_failure: Option<String>,
    update_failure: Option<String>,
    restart_failure: Option<String>,
}

/// Installed dogus: config, descriptors and restart requests.
#[derive(Debug, Default)]
pub struct InMemoryDogus {
    state: Mutex<DogusState>,
}

impl InMemoryDogus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `name` with an optional configured level and an optional
    /// descriptor default for `logging/root`.
    pub fn insert(&self, name: &str, configured: Option<LogLevel>, default: Option<&str>) {
        let mut state = lock(&self.state);
        let mut config = DoguConfig {
            dogu: name.to_string(),
            entries: BTreeMap::new(),
        };
        if let Some(level) = configured {
            config
                .entries
                .insert(LOGGING_KEY.to_string(), level.as_str().to_string());
        }
        state.configs.insert(name.to_string(), config);

        let configuration = default
            .map(|value| {
                vec![ConfigurationField {
                    name: LOGGING_KEY.to_string(),
                    default: Some(value.to_string()),
                }]
            })
            .unwrap_or_default();
        state.descriptors.insert(
            name.to_string(),
            DoguDescriptor {
                name: name.to_string(),
                version: "1.0.0-1".to_string(),
                configuration,
            },
        );
    }

    /// Set `logging/root` verbatim, installing the dogu if needed.
    pub fn set_raw_config(&self, name: &str, value: &str) {
        let mut state = lock(&self.state);
        state
            .configs
            .entry(name.to_string())
            .or_insert_with(|| DoguConfig {
                dogu: name.to_string(),
                entries: BTreeMap::new(),
            })
            .entries
            .insert(LOGGING_KEY.to_string(), value.to_string());
        state
            .descriptors
            .entry(name.to_string())
            .or_insert_with(|| DoguDescriptor {
                name: name.to_string(),
                ..DoguDescriptor::default()
            });
    }

    pub fn remove(&self, name: &str) {
        let mut state = lock(&self.state);
        state.configs.remove(name);
        state.descriptors.remove(name);
    }

    /// Raw `logging/root` value of `name`.
    pub fn raw_config(&self, name: &str) -> Option<String> {
        lock(&self.state)
            .configs
            .get(name)
            .and_then(|config| config.entries.get(LOGGING_KEY).cloned())
    }

    /// Configured level of `name`, `None` if unset or unparseable.
    pub fn configured_level(&self, name: &str) -> Option<LogLevel> {
        self.raw_config(name)
            .and_then(|value| LogLevel::parse(&value).ok())
    }

    /// Dogus a restart was requested for, in request order.
    pub fn restarts(&self) -> Vec<String> {
        lock(&self.state).restarts.clone()
    }

    /// Number of config writes so far.
    pub fn config_writes(&self) -> usize {
        lock(&self.state).config_writes
    }

    pub fn fail_list(&self, message: &str) {
        lock(&self.state).list_failure = Some(message.to_string());
    }

    pub fn fail_updates(&self, message: &str) {
        lock(&self.state).update_failure = Some(message.to_string());
    }

    pub fn fail_restarts(&self, message: &str) {
        lock(&self.state).restart_failure = Some(message.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.list_failure = None;
        state.update_failure = None;
        state.restart_failure = None;
    }
}

#[async_trait]
impl DoguConfigRepository for InMemoryDogus {
    async fn get(&self, dogu: &str) -> Result<DoguConfig, BackendError> {
        lock(&self.state)
            .configs
            .get(dogu)
            .cloned()
            .ok_or_else(|| BackendError::new(format!("dogu {dogu} is not installed")))
    }

    async fn update(&self, config: DoguConfig) -> Result<DoguConfig, BackendError> {
        let mut state = lock(&self.state);
        injected(&state.update_failure)?;
        if !state.configs.contains_key(&config.dogu) {
            return Err(BackendError::new(format!(
                "dogu {} is not installed",
                config.dogu
            )));
        }
        state.config_writes += 1;
        state.configs.insert(config.dogu.clone(), config.clone());
        Ok(config)
    }
}

#[async_trait]
impl DoguDescriptorGetter for InMemoryDogus {
    async fn get_current(&self, dogu: &str) -> Result<DoguDescriptor, BackendError> {
        lock(&self.state)
            .descriptors
            .get(dogu)
            .cloned()
            .ok_or_else(|| BackendError::new(format!("no descriptor for dogu {dogu}")))
    }
}

#[async_trait]
impl DoguRestarter for InMemoryDogus {
    async fn restart(&self, dogu: &str) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        injected(&state.restart_failure)?;
        state.restarts.push(dogu.to_string());
        Ok(())
    }
}

#[async_trait]
impl TargetLister for InMemoryDogus {
    async fn list(&self) -> Result<Vec<String>, BackendError> {
        let state = lock(&self.state);
        injected(&state.list_failure)?;
        Ok(state.configs.keys().cloned().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Components
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ComponentsState {
    components: BTreeMap<String, Component>,
    writes: usize,
    list_failure: Option<String>,
    update_failure: Option<String>,
}

/// Installed components and their mapped values.
#[derive(Debug, Default)]
pub struct InMemoryComponents {
    state: Mutex<ComponentsState>,
}

impl InMemoryComponents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `name`, optionally with a raw `mainLogLevel` mapped value.
    pub fn insert(&self, name: &str, level: Option<&str>) {
        let mut mapped_values = BTreeMap::new();
        if let Some(level) = level {
            mapped_values.insert(MAPPED_LOG_LEVEL_KEY.to_string(), level.to_string());
        }
        lock(&self.state).components.insert(
            name.to_string(),
            Component {
                name: name.to_string(),
                mapped_values,
            },
        );
    }

    pub fn remove(&self, name: &str) {
        lock(&self.state).components.remove(name);
    }

    /// Raw `mainLogLevel` mapped value of `name`.
    pub fn mapped_level(&self, name: &str) -> Option<String> {
        lock(&self.state)
            .components
            .get(name)
            .and_then(|component| component.mapped_values.get(MAPPED_LOG_LEVEL_KEY).cloned())
    }

    /// Number of component writes so far.
    pub fn writes(&self) -> usize {
        lock(&self.state).writes
    }

    pub fn fail_list(&self, message: &str) {
        lock(&self.state).list_failure = Some(message.to_string());
    }

    pub fn fail_updates(&self, message: &str) {
        lock(&self.state).update_failure = Some(message.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.list_failure = None;
        state.update_failure = None;
    }
}

#[async_trait]
impl ComponentClient for InMemoryComponents {
    async fn get(&self, name: &str) -> Result<Option<Component>, BackendError> {
        Ok(lock(&self.state).components.get(name).cloned())
    }

    async fn update(&self, component: Component) -> Result<Component, BackendError> {
        let mut state = lock(&self.state);
        injected(&state.update_failure)?;
        if !state.components.contains_key(&component.name) {
            return Err(BackendError::new(format!(
                "component {} not found",
                component.name
            )));
        }
        state.writes += 1;
        state
            .components
            .insert(component.name.clone(), component.clone());
        Ok(component)
    }
}

#[async_trait]
impl TargetLister for InMemoryComponents {
    async fn list(&self) -> Result<Vec<String>, BackendError> {
        let state = lock(&self.state);
        injected(&state.list_failure)?;
        Ok(state.components.keys().cloned().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RecordsState {
    records: BTreeMap<(String, String), StateRecord>,
    creates: usize,
    deletes: usize,
    update_failure: Option<String>,
}

/// Durable records keyed by `(namespace, name)`.
#[derive(Debug, Default)]
pub struct InMemoryRecords {
    state: Mutex<RecordsState>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, namespace: &str, name: &str) -> Option<StateRecord> {
        lock(&self.state)
            .records
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Store `record` as is, bypassing ownership checks.
    pub fn insert(&self, record: StateRecord) {
        lock(&self.state)
            .records
            .insert((record.namespace.clone(), record.name.clone()), record);
    }

    pub fn create_count(&self) -> usize {
        lock(&self.state).creates
    }

    pub fn delete_count(&self) -> usize {
        lock(&self.state).deletes
    }

    pub fn fail_updates(&self, message: &str) {
        lock(&self.state).update_failure = Some(message.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.state).update_failure = None;
    }
}

#[async_trait]
impl RecordBackend for InMemoryRecords {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<StateRecord>, BackendError> {
        Ok(self.record(namespace, name))
    }

    async fn create(&self, record: StateRecord) -> Result<StateRecord, BackendError> {
        let mut state = lock(&self.state);
        let key = (record.namespace.clone(), record.name.clone());
        if state.records.contains_key(&key) {
            return Err(BackendError::new(format!(
                "record {}/{} already exists",
                record.namespace, record.name
            )));
        }
        state.creates += 1;
        state.records.insert(key, record.clone());
        Ok(record)
    }

    async fn update(&self, record: StateRecord) -> Result<StateRecord, BackendError> {
        let mut state = lock(&self.state);
        injected(&state.update_failure)?;
        let key = (record.namespace.clone(), record.name.clone());
        if !state.records.contains_key(&key) {
            return Err(BackendError::new(format!(
                "record {}/{} not found",
                record.namespace, record.name
            )));
        }
        state.records.insert(key, record.clone());
        Ok(record)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, BackendError> {
        let mut state = lock(&self.state);
        let removed = state
            .records
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some();
        if removed {
            state.deletes += 1;
        }
        Ok(removed)
    }

    async fn list_labeled(
        &self,
        namespace: &str,
        label: &str,
    ) -> Result<Vec<StateRecord>, BackendError> {
        Ok(lock(&self.state)
            .records
            .values()
            .filter(|record| record.namespace == namespace && record.labels.contains_key(label))
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RequestsState {
    requests: BTreeMap<RequestKey, DebugModeRequest>,
    status_writes: usize,
    status_failure: Option<String>,
}

/// `DebugMode` requests keyed by namespace and name.
#[derive(Debug, Default)]
pub struct InMemoryRequests {
    state: Mutex<RequestsState>,
}

impl InMemoryRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request: DebugModeRequest) {
        lock(&self.state).requests.insert(request.key(), request);
    }

    pub fn remove(&self, key: &RequestKey) -> Option<DebugModeRequest> {
        lock(&self.state).requests.remove(key)
    }

    pub fn request(&self, key: &RequestKey) -> Option<DebugModeRequest> {
        lock(&self.state).requests.get(key).cloned()
    }

    /// Number of status writes so far.
    pub fn status_writes(&self) -> usize {
        lock(&self.state).status_writes
    }

    pub fn fail_status_updates(&self, message: &str) {
        lock(&self.state).status_failure = Some(message.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.state).status_failure = None;
    }
}

#[async_trait]
impl DebugModeClient for InMemoryRequests {
    async fn get(&self, key: &RequestKey) -> Result<Option<DebugModeRequest>, BackendError> {
        Ok(self.request(key))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<DebugModeRequest>, BackendError> {
        Ok(lock(&self.state)
            .requests
            .values()
            .filter(|request| request.metadata.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        request: &DebugModeRequest,
    ) -> Result<DebugModeRequest, BackendError> {
        let mut state = lock(&self.state);
        injected(&state.status_failure)?;
        let stored = state
            .requests
            .get_mut(&request.key())
            .ok_or_else(|| BackendError::new(format!("debug mode {} not found", request.key())))?;
        stored.status = request.status.clone();
        let updated = stored.clone();
        state.status_writes += 1;
        Ok(updated)
    }
}
