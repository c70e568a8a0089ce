//! Filesystem-backed ecosystem for running the operator outside a cluster.
//!
//! ## Layout
//!
//! ```text
//! {root}/{namespace}/
//!   debugmodes/{name}.json       DebugModeRequest
//!   dogus/{name}.json            LocalDogu (config + descriptor defaults)
//!   components/{name}.json       Component (mapped values)
//!   configmaps/{name}.json       StateRecord
//!   dogurestarts/{dogu}-{id}.json DoguRestart
//! ```
//!
//! Every write goes through a `.tmp` sibling and a rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use debugmode_controller::handler::{
    Component, ComponentClient, ConfigurationField, DoguConfig, DoguConfigRepository,
    DoguDescriptor, DoguDescriptorGetter, DoguRestarter,
};
use debugmode_controller::{
    BackendError, DebugModeClient, DebugModeRequest, RecordBackend, RequestKey, StateRecord,
    TargetLister,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const DEBUGMODES_DIR: &str = "debugmodes";
const DOGUS_DIR: &str = "dogus";
const COMPONENTS_DIR: &str = "components";
const CONFIGMAPS_DIR: &str = "configmaps";
const DOGU_RESTARTS_DIR: &str = "dogurestarts";

/// Errors from the local backend.
#[derive(Debug, thiserror::Error)]
pub enum LocalBackendError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },
}

impl From<LocalBackendError> for BackendError {
    fn from(err: LocalBackendError) -> Self {
        BackendError::with_source("local backend", err)
    }
}

/// A dogu as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalDogu {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub configuration: Vec<ConfigurationField>,
}

/// Restart request written for a dogu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoguRestart {
    pub name: String,
    pub dogu: String,
    pub created_at: DateTime<Utc>,
}

/// One directory of JSON documents.
#[derive(Debug, Clone)]
struct JsonDir {
    dir: PathBuf,
    kind: &'static str,
}

impl JsonDir {
    fn new(dir: PathBuf, kind: &'static str) -> Result<Self, LocalBackendError> {
        std::fs::create_dir_all(&dir).map_err(|source| LocalBackendError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir, kind })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, LocalBackendError> {
        let path = self.path(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LocalBackendError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| LocalBackendError::Serde { path, source })
    }

    fn read_existing<T: DeserializeOwned>(&self, name: &str) -> Result<T, LocalBackendError> {
        self.read(name)?.ok_or_else(|| LocalBackendError::NotFound {
            kind: self.kind,
            name: name.to_string(),
        })
    }

    /// Atomically write `value` to `{name}.json` via a `.tmp` sibling.
    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), LocalBackendError> {
        let path = self.path(name);
        let json = serde_json::to_vec_pretty(value).map_err(|source| LocalBackendError::Serde {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|source| LocalBackendError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| LocalBackendError::Io { path, source })
    }

    fn remove(&self, name: &str) -> Result<bool, LocalBackendError> {
        let path = self.path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(LocalBackendError::Io { path, source }),
        }
    }

    /// Document names, sorted.
    fn names(&self) -> Result<Vec<String>, LocalBackendError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| LocalBackendError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LocalBackendError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, LocalBackendError> {
        let mut values = Vec::new();
        for name in self.names()? {
            if let Some(value) = self.read(&name)? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dogus
// ─────────────────────────────────────────────────────────────────────────────

/// Dogus of one namespace.
#[derive(Debug, Clone)]
pub struct LocalDogus {
    dogus: JsonDir,
    restarts: JsonDir,
}

impl LocalDogus {
    fn open(namespace_dir: &Path) -> Result<Self, LocalBackendError> {
        Ok(Self {
            dogus: JsonDir::new(namespace_dir.join(DOGUS_DIR), "dogu")?,
            restarts: JsonDir::new(namespace_dir.join(DOGU_RESTARTS_DIR), "dogu restart")?,
        })
    }

    /// Install or replace a dogu.
    pub fn put(&self, dogu: &LocalDogu) -> Result<(), LocalBackendError> {
        self.dogus.write(&dogu.name, dogu)
    }

    pub fn dogu(&self, name: &str) -> Result<Option<LocalDogu>, LocalBackendError> {
        self.dogus.read(name)
    }

    /// Every restart request written so far, oldest first.
    pub fn restarts(&self) -> Result<Vec<DoguRestart>, LocalBackendError> {
        let mut restarts: Vec<DoguRestart> = self.restarts.read_all()?;
        restarts.sort_by_key(|r| r.created_at);
        Ok(restarts)
    }
}

#[async_trait]
impl DoguConfigRepository for LocalDogus {
    async fn get(&self, dogu: &str) -> Result<DoguConfig, BackendError> {
        let stored: LocalDogu = self.dogus.read_existing(dogu)?;
        Ok(DoguConfig {
            dogu: stored.name,
            entries: stored.config,
        })
    }

    async fn update(&self, config: DoguConfig) -> Result<DoguConfig, BackendError> {
        let mut stored: LocalDogu = self.dogus.read_existing(&config.dogu)?;
        stored.config = config.entries.clone();
        self.dogus.write(&stored.name, &stored)?;
        Ok(config)
    }
}

#[async_trait]
impl DoguDescriptorGetter for LocalDogus {
    async fn get_current(&self, dogu: &str) -> Result<DoguDescriptor, BackendError> {
        let stored: LocalDogu = self.dogus.read_existing(dogu)?;
        Ok(DoguDescriptor {
            name: stored.name,
            version: stored.version,
            configuration: stored.configuration,
        })
    }
}

#[async_trait]
impl DoguRestarter for LocalDogus {
    async fn restart(&self, dogu: &str) -> Result<(), BackendError> {
        let restart = DoguRestart {
            name: format!("{dogu}-{}", uuid::Uuid::new_v4()),
            dogu: dogu.to_string(),
            created_at: Utc::now(),
        };
        self.restarts.write(&restart.name, &restart)?;
        tracing::info!(dogu, restart = %restart.name, "requested dogu restart");
        Ok(())
    }
}

#[async_trait]
impl TargetLister for LocalDogus {
    async fn list(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.dogus.names()?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Components
// ─────────────────────────────────────────────────────────────────────────────

/// Components of one namespace.
#[derive(Debug, Clone)]
pub struct LocalComponents {
    components: JsonDir,
}

impl LocalComponents {
    fn open(namespace_dir: &Path) -> Result<Self, LocalBackendError> {
        Ok(Self {
            components: JsonDir::new(namespace_dir.join(COMPONENTS_DIR), "component")?,
        })
    }

    /// Install or replace a component.
    pub fn put(&self, component: &Component) -> Result<(), LocalBackendError> {
        self.components.write(&component.name, component)
    }

    pub fn component(&self, name: &str) -> Result<Option<Component>, LocalBackendError> {
        self.components.read(name)
    }
}

#[async_trait]
impl ComponentClient for LocalComponents {
    async fn get(&self, name: &str) -> Result<Option<Component>, BackendError> {
        Ok(self.components.read(name)?)
    }

    async fn update(&self, component: Component) -> Result<Component, BackendError> {
        let _: Component = self.components.read_existing(&component.name)?;
        self.components.write(&component.name, &component)?;
        Ok(component)
    }
}

#[async_trait]
impl TargetLister for LocalComponents {
    async fn list(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.components.names()?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State records and requests (any namespace under the root)
// ─────────────────────────────────────────────────────────────────────────────

/// State records stored as `configmaps/*.json`.
#[derive(Debug, Clone)]
pub struct LocalRecords {
    root: PathBuf,
}

impl LocalRecords {
    fn dir(&self, namespace: &str) -> Result<JsonDir, LocalBackendError> {
        JsonDir::new(self.root.join(namespace).join(CONFIGMAPS_DIR), "configmap")
    }
}

#[async_trait]
impl RecordBackend for LocalRecords {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<StateRecord>, BackendError> {
        Ok(self.dir(namespace)?.read(name)?)
    }

    async fn create(&self, record: StateRecord) -> Result<StateRecord, BackendError> {
        let dir = self.dir(&record.namespace)?;
        if dir.read::<StateRecord>(&record.name)?.is_some() {
            return Err(LocalBackendError::AlreadyExists {
                kind: "configmap",
                name: format!("{}/{}", record.namespace, record.name),
            }
            .into());
        }
        dir.write(&record.name, &record)?;
        Ok(record)
    }

    async fn update(&self, record: StateRecord) -> Result<StateRecord, BackendError> {
        let dir = self.dir(&record.namespace)?;
        let _: StateRecord = dir.read_existing(&record.name)?;
        dir.write(&record.name, &record)?;
        Ok(record)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, BackendError> {
        Ok(self.dir(namespace)?.remove(name)?)
    }

    async fn list_labeled(
        &self,
        namespace: &str,
        label: &str,
    ) -> Result<Vec<StateRecord>, BackendError> {
        let records: Vec<StateRecord> = self.dir(namespace)?.read_all()?;
        Ok(records
            .into_iter()
            .filter(|record| record.labels.contains_key(label))
            .collect())
    }
}

/// `DebugMode` requests stored as `debugmodes/*.json`.
#[derive(Debug, Clone)]
pub struct LocalRequests {
    root: PathBuf,
}

impl LocalRequests {
    fn dir(&self, namespace: &str) -> Result<JsonDir, LocalBackendError> {
        JsonDir::new(self.root.join(namespace).join(DEBUGMODES_DIR), "debug mode")
    }

    /// Create or replace a request, spec and status alike.
    pub fn put(&self, request: &DebugModeRequest) -> Result<(), LocalBackendError> {
        self.dir(&request.metadata.namespace)?
            .write(&request.metadata.name, request)
    }

    pub fn remove(&self, key: &RequestKey) -> Result<bool, LocalBackendError> {
        self.dir(&key.namespace)?.remove(&key.name)
    }
}

#[async_trait]
impl DebugModeClient for LocalRequests {
    async fn get(&self, key: &RequestKey) -> Result<Option<DebugModeRequest>, BackendError> {
        Ok(self.dir(&key.namespace)?.read(&key.name)?)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<DebugModeRequest>, BackendError> {
        Ok(self.dir(namespace)?.read_all()?)
    }

    async fn update_status(
        &self,
        request: &DebugModeRequest,
    ) -> Result<DebugModeRequest, BackendError> {
        let dir = self.dir(&request.metadata.namespace)?;
        let mut stored: DebugModeRequest = dir.read_existing(&request.metadata.name)?;
        stored.status = request.status.clone();
        dir.write(&stored.metadata.name, &stored)?;
        Ok(stored)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ecosystem
// ─────────────────────────────────────────────────────────────────────────────

/// Every local collaborator for one namespace.
#[derive(Debug, Clone)]
pub struct LocalEcosystem {
    namespace_dir: PathBuf,
    pub dogus: Arc<LocalDogus>,
    pub components: Arc<LocalComponents>,
    pub records: Arc<LocalRecords>,
    pub requests: Arc<LocalRequests>,
}

impl LocalEcosystem {
    /// Open (creating directories as needed) `{root}/{namespace}`.
    pub fn open(root: &Path, namespace: &str) -> Result<Self, LocalBackendError> {
        let namespace_dir = root.join(namespace);
        let ecosystem = Self {
            dogus: Arc::new(LocalDogus::open(&namespace_dir)?),
            components: Arc::new(LocalComponents::open(&namespace_dir)?),
            records: Arc::new(LocalRecords {
                root: root.to_path_buf(),
            }),
            requests: Arc::new(LocalRequests {
                root: root.to_path_buf(),
            }),
            namespace_dir,
        };
        ecosystem.records.dir(namespace)?;
        ecosystem.requests.dir(namespace)?;
        Ok(ecosystem)
    }

    pub fn namespace_dir(&self) -> &Path {
        &self.namespace_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use debugmode_controller::LogLevel;
    use debugmode_controller::handler::LOGGING_KEY;
    use debugmode_controller::memory::request;
    use pretty_assertions::assert_eq;

    fn ecosystem() -> (tempfile::TempDir, LocalEcosystem) {
        let dir = tempfile::tempdir().unwrap();
        let ecosystem = LocalEcosystem::open(dir.path(), "ecosystem").unwrap();
        (dir, ecosystem)
    }

    fn dogu(name: &str, level: Option<&str>, default: Option<&str>) -> LocalDogu {
        let mut config = BTreeMap::new();
        if let Some(level) = level {
            config.insert(LOGGING_KEY.to_string(), level.to_string());
        }
        LocalDogu {
            name: name.to_string(),
            version: "7.0.5-1".to_string(),
            config,
            configuration: default
                .map(|d| {
                    vec![ConfigurationField {
                        name: LOGGING_KEY.to_string(),
                        default: Some(d.to_string()),
                    }]
                })
                .unwrap_or_default(),
        }
    }

    #[test]
    fn open_creates_layout() {
        let (_dir, ecosystem) = ecosystem();
        for sub in [
            DEBUGMODES_DIR,
            DOGUS_DIR,
            COMPONENTS_DIR,
            CONFIGMAPS_DIR,
            DOGU_RESTARTS_DIR,
        ] {
            assert!(ecosystem.namespace_dir().join(sub).is_dir(), "{sub}");
        }
    }

    #[tokio::test]
    async fn dogu_config_round_trips_through_disk() {
        let (_dir, ecosystem) = ecosystem();
        ecosystem
            .dogus
            .put(&dogu("cas", Some("INFO"), Some("WARN")))
            .unwrap();

        let mut config = DoguConfigRepository::get(ecosystem.dogus.as_ref(), "cas")
            .await
            .unwrap();
        config
            .entries
            .insert(LOGGING_KEY.to_string(), LogLevel::Debug.to_string());
        ecosystem.dogus.update(config).await.unwrap();

        let stored = ecosystem.dogus.dogu("cas").unwrap().unwrap();
        assert_eq!(stored.config.get(LOGGING_KEY).map(String::as_str), Some("DEBUG"));
        assert_eq!(stored.version, "7.0.5-1");
        let descriptor = ecosystem.dogus.get_current("cas").await.unwrap();
        assert_eq!(descriptor.default_for(LOGGING_KEY), Some("WARN"));
    }

    #[tokio::test]
    async fn missing_dogu_is_an_error() {
        let (_dir, ecosystem) = ecosystem();
        let err = DoguConfigRepository::get(ecosystem.dogus.as_ref(), "ghost")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "dogu ghost not found");
    }

    #[tokio::test]
    async fn restarts_are_written_as_documents() {
        let (_dir, ecosystem) = ecosystem();
        ecosystem.dogus.restart("cas").await.unwrap();
        ecosystem.dogus.restart("cas").await.unwrap();

        let restarts = ecosystem.dogus.restarts().unwrap();
        assert_eq!(restarts.len(), 2);
        assert!(restarts.iter().all(|r| r.dogu == "cas"));
        assert_ne!(restarts[0].name, restarts[1].name);
    }

    #[tokio::test]
    async fn listings_are_sorted_and_ignore_temp_files() {
        let (_dir, ecosystem) = ecosystem();
        ecosystem.dogus.put(&dogu("redmine", None, None)).unwrap();
        ecosystem.dogus.put(&dogu("cas", None, None)).unwrap();
        std::fs::write(
            ecosystem.namespace_dir().join(DOGUS_DIR).join("ldap.tmp"),
            b"{}",
        )
        .unwrap();

        let names = TargetLister::list(ecosystem.dogus.as_ref()).await.unwrap();
        assert_eq!(names, vec!["cas".to_string(), "redmine".to_string()]);
    }

    #[tokio::test]
    async fn component_update_requires_existing_component() {
        let (_dir, ecosystem) = ecosystem();
        let component = Component {
            name: "k8s-loki".to_string(),
            mapped_values: BTreeMap::new(),
        };
        assert!(ecosystem.components.update(component.clone()).await.is_err());

        ecosystem.components.put(&component).unwrap();
        let mut changed = component.clone();
        changed
            .mapped_values
            .insert("mainLogLevel".to_string(), "debug".to_string());
        ecosystem.components.update(changed.clone()).await.unwrap();
        assert_eq!(
            ecosystem.components.component("k8s-loki").unwrap(),
            Some(changed)
        );
    }

    #[tokio::test]
    async fn records_follow_backend_contract() {
        let (_dir, ecosystem) = ecosystem();
        let owner = request(
            "ecosystem",
            "debug",
            "DEBUG",
            DateTime::<Utc>::MAX_UTC,
        );
        let record = StateRecord::owned_by(&owner);
        let records = ecosystem.records.as_ref();

        assert_eq!(records.get("ecosystem", &record.name).await.unwrap(), None);
        records.create(record.clone()).await.unwrap();
        assert!(records.create(record.clone()).await.is_err());

        let mut updated = record.clone();
        updated
            .data
            .insert("dogu.cas".to_string(), "INFO".to_string());
        assert_eq!(records.update(updated.clone()).await.unwrap(), updated);
        assert_eq!(
            records.list_labeled("ecosystem", debugmode_controller::state_store::OWNER_LABEL)
                .await
                .unwrap(),
            vec![updated]
        );

        assert!(records.delete("ecosystem", &record.name).await.unwrap());
        assert!(!records.delete("ecosystem", &record.name).await.unwrap());
    }

    #[tokio::test]
    async fn status_update_keeps_spec_on_disk() {
        let (_dir, ecosystem) = ecosystem();
        let original = request(
            "ecosystem",
            "debug",
            "DEBUG",
            DateTime::<Utc>::MAX_UTC,
        );
        ecosystem.requests.put(&original).unwrap();

        let mut changed = original.clone();
        changed.spec.target_log_level = "ERROR".to_string();
        changed.status.phase = Some(debugmode_controller::Phase::Set);
        let stored = ecosystem.requests.update_status(&changed).await.unwrap();

        assert_eq!(stored.spec, original.spec);
        assert_eq!(stored.status.phase, Some(debugmode_controller::Phase::Set));
        assert_eq!(
            DebugModeClient::list(ecosystem.requests.as_ref(), "ecosystem")
                .await
                .unwrap(),
            vec![stored]
        );
    }

    #[tokio::test]
    async fn malformed_document_surfaces_path() {
        let (_dir, ecosystem) = ecosystem();
        let path = ecosystem.namespace_dir().join(COMPONENTS_DIR).join("broken.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = ecosystem.components.component("broken").unwrap_err();
        assert!(matches!(err, LocalBackendError::Serde { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn backend_error_names_the_failure_once() {
        let err = BackendError::from(LocalBackendError::NotFound {
            kind: "dogu",
            name: "cas".to_string(),
        });
        assert_eq!(err.to_string(), "local backend");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "dogu cas not found");
    }
}
