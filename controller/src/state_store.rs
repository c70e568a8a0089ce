//! Durable fallback levels of one debug-mode session.
//!
//! All entries live in a single record named [`STATE_RECORD_NAME`] in the
//! request's namespace. The record is created lazily by [`StateStore::open`],
//! written with plain read-modify-write (no compare-and-swap) and deleted once
//! rollback has converged.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, DebugModeError, Result};
use crate::request::DebugModeRequest;

/// Name of the backing record.
pub const STATE_RECORD_NAME: &str = "debugmode-state";

/// Label tying a state record to the request that owns it.
pub const OWNER_LABEL: &str = "debugmode.k8s.cloudogu.com/owner";

/// Reference from a state record back to its request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

impl OwnerReference {
    pub fn of(request: &DebugModeRequest) -> Self {
        Self {
            name: request.metadata.name.clone(),
            uid: request.metadata.uid.clone(),
        }
    }
}

/// Flat string map plus the metadata needed to find and own it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerReference>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl StateRecord {
    /// Empty record owned by `request`.
    pub fn owned_by(request: &DebugModeRequest) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(OWNER_LABEL.to_string(), request.metadata.name.clone());
        Self {
            name: STATE_RECORD_NAME.to_string(),
            namespace: request.metadata.namespace.clone(),
            labels,
            owner: Some(OwnerReference::of(request)),
            data: BTreeMap::new(),
        }
    }

    pub fn owner_label(&self) -> Option<&str> {
        self.labels.get(OWNER_LABEL).map(String::as_str)
    }

    /// Name of the owning request, preferring the owner reference.
    pub fn owner_name(&self) -> Option<&str> {
        self.owner
            .as_ref()
            .map(|owner| owner.name.as_str())
            .or_else(|| self.owner_label())
    }
}

/// Durable key/value records, one namespace at a time.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// `Ok(None)` if the record does not exist.
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<Option<StateRecord>, BackendError>;

    async fn create(&self, record: StateRecord) -> std::result::Result<StateRecord, BackendError>;

    /// Replace the record, returning what was stored.
    async fn update(&self, record: StateRecord) -> std::result::Result<StateRecord, BackendError>;

    /// `Ok(false)` if the record was already gone.
    async fn delete(&self, namespace: &str, name: &str) -> std::result::Result<bool, BackendError>;

    /// Every record in `namespace` that carries the label key `label`.
    async fn list_labeled(
        &self,
        namespace: &str,
        label: &str,
    ) -> std::result::Result<Vec<StateRecord>, BackendError>;
}

/// Handle on the session's fallback record.
pub struct StateStore {
    backend: Arc<dyn RecordBackend>,
    snapshot: StateRecord,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Load the session record of `owner`, creating it if absent.
    pub async fn open(backend: Arc<dyn RecordBackend>, owner: &DebugModeRequest) -> Result<Self> {
        let namespace = owner.metadata.namespace.as_str();
        let existing = backend
            .get(namespace, STATE_RECORD_NAME)
            .await
            .map_err(|e| DebugModeError::backend("get state record", e))?;

        let snapshot = match existing {
            Some(record) => {
                if record.owner_label() != Some(owner.metadata.name.as_str()) {
                    return Err(DebugModeError::ForeignStateRecord {
                        namespace: namespace.to_string(),
                        record: STATE_RECORD_NAME.to_string(),
                        owner: record.owner_label().map(str::to_string),
                        expected: owner.metadata.name.clone(),
                    });
                }
                let reference = OwnerReference::of(owner);
                if record.owner.as_ref() == Some(&reference) {
                    record
                } else {
                    adopt(backend.as_ref(), record, reference).await?
                }
            }
            None => {
                let created = backend
                    .create(StateRecord::owned_by(owner))
                    .await
                    .map_err(|e| DebugModeError::backend("create state record", e))?;
                tracing::debug!(namespace, "created state record");
                created
            }
        };

        Ok(Self { backend, snapshot })
    }

    /// Value of `key` in the last loaded snapshot.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.snapshot.data.get(key).map(String::as_str)
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.snapshot.data
    }

    pub fn record(&self) -> &StateRecord {
        &self.snapshot
    }

    /// Read the record afresh, set `key` and write it back.
    pub async fn put(&mut self, key: &str, value: &str) -> Result<()> {
        let namespace = self.snapshot.namespace.clone();
        let mut current = self
            .backend
            .get(&namespace, STATE_RECORD_NAME)
            .await
            .map_err(|e| DebugModeError::backend("get state record", e))?
            .ok_or_else(|| {
                DebugModeError::backend(
                    format!("store fallback for {key}"),
                    BackendError::new("state record vanished"),
                )
            })?;
        current.data.insert(key.to_string(), value.to_string());

        self.snapshot = self
            .backend
            .update(current)
            .await
            .map_err(|e| DebugModeError::backend(format!("store fallback for {key}"), e))?;
        tracing::debug!(key, value, "stored fallback log level");
        Ok(())
    }

    /// Delete the record. `Ok(false)` if it was already gone.
    pub async fn destroy(self) -> Result<bool> {
        let deleted = self
            .backend
            .delete(&self.snapshot.namespace, &self.snapshot.name)
            .await
            .map_err(|e| DebugModeError::backend("delete state record", e))?;
        if !deleted {
            tracing::debug!(namespace = %self.snapshot.namespace, "state record already gone");
        }
        Ok(deleted)
    }
}

/// Take over a record left by an earlier request of the same name.
///
/// The stored fallbacks still hold the levels from before that session, so
/// they are kept; only the owner reference moves to the new request.
async fn adopt(
    backend: &dyn RecordBackend,
    mut record: StateRecord,
    reference: OwnerReference,
) -> Result<StateRecord> {
    tracing::info!(
        namespace = %record.namespace,
        owner = %reference.name,
        previous_uid = record.owner.as_ref().map(|o| o.uid.as_str()).unwrap_or_default(),
        uid = %reference.uid,
        entries = record.data.len(),
        "adopting state record of a previous request"
    );
    record.owner = Some(reference);
    backend
        .update(record)
        .await
        .map_err(|e| DebugModeError::backend("adopt state record", e))
}

/// Delete state records in `namespace` whose owning request is gone.
///
/// A record is orphaned when no request in `requests` has its owner's name. A
/// request recreated under the same name adopts the record on its next pass
/// instead, see [`StateStore::open`]. The fallback levels of a reaped record are logged so they can be restored
/// by hand. Returns the reaped records.
pub async fn reap_orphans(
    backend: &dyn RecordBackend,
    namespace: &str,
    requests: &[DebugModeRequest],
) -> Result<Vec<StateRecord>> {
    let records = backend
        .list_labeled(namespace, OWNER_LABEL)
        .await
        .map_err(|e| DebugModeError::backend("list state records", e))?;

    let mut reaped = Vec::new();
    for record in records {
        if is_owned(&record, requests) {
            continue;
        }

        tracing::warn!(
            namespace,
            record = %record.name,
            owner = record.owner_name().unwrap_or_default(),
            abandoned = ?record.data,
            "deleting orphaned state record; abandoned fallback levels are not restored"
        );
        backend
            .delete(namespace, &record.name)
            .await
            .map_err(|e| DebugModeError::backend("delete orphaned state record", e))?;
        reaped.push(record);
    }
    Ok(reaped)
}

fn is_owned(record: &StateRecord, requests: &[DebugModeRequest]) -> bool {
    let Some(owner_name) = record.owner_name() else {
        return false;
    };
    requests
        .iter()
        .any(|request| request.metadata.name == owner_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryRecords, request};
    use pretty_assertions::assert_eq;

    fn deadline() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    fn backend() -> Arc<InMemoryRecords> {
        Arc::new(InMemoryRecords::new())
    }

    #[tokio::test]
    async fn open_creates_owned_record_once() {
        let records = backend();
        let owner = request("ecosystem", "debug", "DEBUG", deadline());

        let store = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap();
        assert!(store.entries().is_empty());
        StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap();

        assert_eq!(records.create_count(), 1);
        let stored = records.record("ecosystem", STATE_RECORD_NAME).unwrap();
        assert_eq!(stored.owner_label(), Some("debug"));
        assert_eq!(
            stored.owner,
            Some(OwnerReference {
                name: "debug".to_string(),
                uid: owner.metadata.uid.clone(),
            })
        );
    }

    #[tokio::test]
    async fn put_is_visible_to_later_opens() {
        let records = backend();
        let owner = request("ecosystem", "debug", "DEBUG", deadline());

        let mut store = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap();
        store.put("dogu.cas", "INFO").await.unwrap();
        assert_eq!(store.get("dogu.cas"), Some("INFO"));

        let reopened = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap();
        assert_eq!(reopened.get("dogu.cas"), Some("INFO"));
        assert_eq!(reopened.get("dogu.ldap"), None);
    }

    #[tokio::test]
    async fn put_rereads_before_writing() {
        let records = backend();
        let owner = request("ecosystem", "debug", "DEBUG", deadline());
        let mut first = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap();
        let mut second = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap();

        first.put("dogu.cas", "INFO").await.unwrap();
        second.put("dogu.ldap", "WARN").await.unwrap();

        let stored = records.record("ecosystem", STATE_RECORD_NAME).unwrap();
        assert_eq!(stored.data.len(), 2);
        assert_eq!(second.get("dogu.cas"), Some("INFO"));
    }

    #[tokio::test]
    async fn foreign_record_is_a_consistency_error() {
        let records = backend();
        let previous = request("ecosystem", "old-debug", "DEBUG", deadline());
        StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &previous)
            .await
            .unwrap();

        let owner = request("ecosystem", "debug", "DEBUG", deadline());
        let err = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Consistency);
        assert!(matches!(
            err,
            DebugModeError::ForeignStateRecord { owner: Some(ref name), .. } if name == "old-debug"
        ));
    }

    #[tokio::test]
    async fn recreated_request_adopts_record_and_keeps_fallbacks() {
        let records = backend();
        let first = request("ecosystem", "debug", "DEBUG", deadline());
        let mut store = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &first)
            .await
            .unwrap();
        store.put("dogu.cas", "INFO").await.unwrap();

        let mut recreated = first.clone();
        recreated.metadata.uid = "recreated-uid".to_string();
        let adopted = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &recreated)
            .await
            .unwrap();
        assert_eq!(adopted.get("dogu.cas"), Some("INFO"));

        let stored = records.record("ecosystem", STATE_RECORD_NAME).unwrap();
        assert_eq!(stored.owner, Some(OwnerReference::of(&recreated)));
        assert_eq!(records.create_count(), 1);

        let reaped = reap_orphans(records.as_ref(), "ecosystem", &[recreated])
            .await
            .unwrap();
        assert!(reaped.is_empty());
    }

    #[tokio::test]
    async fn destroy_reports_missing_record() {
        let records = backend();
        let owner = request("ecosystem", "debug", "DEBUG", deadline());
        let store = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap();
        let again = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap();

        assert!(store.destroy().await.unwrap());
        assert!(!again.destroy().await.unwrap());
        assert_eq!(records.record("ecosystem", STATE_RECORD_NAME), None);
    }

    #[tokio::test]
    async fn reap_deletes_records_of_vanished_requests_only() {
        let records = backend();
        let owner = request("ecosystem", "debug", "DEBUG", deadline());
        let mut store = StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap();
        store.put("dogu.cas", "INFO").await.unwrap();

        let reaped = reap_orphans(records.as_ref(), "ecosystem", std::slice::from_ref(&owner))
            .await
            .unwrap();
        assert!(reaped.is_empty());

        let mut recreated = owner.clone();
        recreated.metadata.uid = "another-uid".to_string();
        let reaped = reap_orphans(records.as_ref(), "ecosystem", &[recreated])
            .await
            .unwrap();
        assert!(reaped.is_empty());

        let reaped = reap_orphans(records.as_ref(), "ecosystem", &[]).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].data.get("dogu.cas").map(String::as_str), Some("INFO"));
        assert_eq!(records.record("ecosystem", STATE_RECORD_NAME), None);
    }

    #[tokio::test]
    async fn reap_ignores_other_namespaces() {
        let records = backend();
        let owner = request("other", "debug", "DEBUG", deadline());
        StateStore::open(Arc::clone(&records) as Arc<dyn RecordBackend>, &owner)
            .await
            .unwrap();

        let reaped = reap_orphans(records.as_ref(), "ecosystem", &[]).await.unwrap();
        assert!(reaped.is_empty());
        assert!(records.record("other", STATE_RECORD_NAME).is_some());
    }
}
