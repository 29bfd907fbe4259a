//! ---
//! tether_section: "02-backend-rpc-data-model"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Backend request/response schema and service trait."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
//! In-memory backend, primarily for tests and single-process integration.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::debug;

use crate::service::*;
use crate::types::{
    AppId, ImageDefinition, LogEntry, Namespace, ObjectDefinition, ObjectId, ObjectKind,
};
use crate::{BackendError, Result};

/// Every request accepted by the mock, in arrival order.
///
/// Tests assert creation ordering and redeploy behavior against this log.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum RecordedRequest {
    AppCreate(AppCreateRequest),
    AppGetObjects(AppGetObjectsRequest),
    AppGetByDeploymentName(AppGetByDeploymentNameRequest),
    ObjectCreate(ObjectCreateRequest),
    AppIncludeObject(AppIncludeObjectRequest),
    AppSetObjects(AppSetObjectsRequest),
    AppDeploy(AppDeployRequest),
    AppClientDisconnect(AppClientDisconnectRequest),
    AppDetach(AppDetachRequest),
    AppStreamLogs(AppStreamLogsRequest),
}

#[derive(Default)]
struct MockState {
    app_counter: u64,
    kind_counters: HashMap<ObjectKind, u64>,
    app_objects: HashMap<AppId, std::collections::BTreeMap<String, ObjectId>>,
    deployments: HashMap<(String, Namespace), AppId>,
    requests: Vec<RecordedRequest>,
    pending_logs: Vec<LogEntry>,
    fail_object_create: bool,
    null_identity: bool,
    identity_drift: bool,
}

/// In-memory [`RemoteService`] backed by a mutex-protected state table.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    /// Create an empty mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `object_create` fail.
    pub fn fail_object_create(&self, fail: bool) {
        self.state.lock().fail_object_create = fail;
    }

    /// Make every subsequent `object_create` return no identity.
    pub fn return_null_identity(&self, null: bool) {
        self.state.lock().null_identity = null;
    }

    /// Ignore requested existing identities, returning fresh ones instead.
    pub fn drift_identities(&self, drift: bool) {
        self.state.lock().identity_drift = drift;
    }

    /// Queue a log entry for the next `app_stream_logs` call.
    pub fn push_log(&self, entry: LogEntry) {
        self.state.lock().pending_logs.push(entry);
    }

    /// Snapshot of every request accepted so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Convenience filter over [`Self::requests`] for creation calls.
    pub fn object_creates(&self) -> Vec<ObjectCreateRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter_map(|req| match req {
                RecordedRequest::ObjectCreate(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    /// Published tag→identity map for an application.
    pub fn published_objects(
        &self,
        app_id: &AppId,
    ) -> Option<std::collections::BTreeMap<String, ObjectId>> {
        self.state.lock().app_objects.get(app_id).cloned()
    }

    /// Application bound to a deployment name, if any.
    pub fn deployed_app(&self, name: &str, namespace: Namespace) -> Option<AppId> {
        self.state
            .lock()
            .deployments
            .get(&(name.to_owned(), namespace))
            .cloned()
    }

    fn fresh_object_id(state: &mut MockState, kind: ObjectKind) -> ObjectId {
        // Prefixes are cosmetic; nothing client-side is allowed to parse them.
        let prefix = match kind {
            ObjectKind::Image => "im",
            ObjectKind::Mount => "mo",
            ObjectKind::Secret => "st",
            ObjectKind::Queue => "qu",
            ObjectKind::Function => "fu",
        };
        let counter = state.kind_counters.entry(kind).or_insert(0);
        *counter += 1;
        ObjectId::new(format!("{}-{}", prefix, counter))
    }

    fn image_identity(definition: &ImageDefinition) -> ObjectId {
        let serialized =
            serde_json::to_vec(definition).expect("image definition serializes");
        let digest = Sha256::digest(&serialized);
        let mut hex = String::with_capacity(12);
        for byte in digest.iter().take(6) {
            hex.push_str(&format!("{:02x}", byte));
        }
        ObjectId::new(format!("im-{}", hex))
    }
}

#[async_trait]
impl RemoteService for MockBackend {
    async fn app_create(&self, req: AppCreateRequest) -> Result<AppCreateResponse> {
        let mut state = self.state.lock();
        state.requests.push(RecordedRequest::AppCreate(req));
        state.app_counter += 1;
        let app_id = AppId::new(format!("ap-{}", state.app_counter));
        state.app_objects.entry(app_id.clone()).or_default();
        debug!(app_id = %app_id, "mock backend created app");
        Ok(AppCreateResponse { app_id })
    }

    async fn app_get_objects(&self, req: AppGetObjectsRequest) -> Result<AppGetObjectsResponse> {
        let mut state = self.state.lock();
        let object_ids = state
            .app_objects
            .get(&req.app_id)
            .cloned()
            .unwrap_or_default();
        state.requests.push(RecordedRequest::AppGetObjects(req));
        Ok(AppGetObjectsResponse { object_ids })
    }

    async fn app_get_by_deployment_name(
        &self,
        req: AppGetByDeploymentNameRequest,
    ) -> Result<AppGetByDeploymentNameResponse> {
        let mut state = self.state.lock();
        let app_id = state
            .deployments
            .get(&(req.name.clone(), req.namespace))
            .cloned();
        state
            .requests
            .push(RecordedRequest::AppGetByDeploymentName(req));
        Ok(AppGetByDeploymentNameResponse {
            app_id,
            last_log_entry_id: None,
        })
    }

    async fn object_create(&self, req: ObjectCreateRequest) -> Result<ObjectCreateResponse> {
        let mut state = self.state.lock();
        if state.fail_object_create {
            state.requests.push(RecordedRequest::ObjectCreate(req));
            return Err(BackendError::RequestFailed(
                "object creation refused".to_owned(),
            ));
        }
        if state.null_identity {
            state.requests.push(RecordedRequest::ObjectCreate(req));
            return Ok(ObjectCreateResponse { object_id: None });
        }
        let object_id = match &req.definition {
            ObjectDefinition::Image(definition) => Self::image_identity(definition),
            other => match (&req.existing_object_id, state.identity_drift) {
                (Some(existing), false) => existing.clone(),
                _ => Self::fresh_object_id(&mut state, other.kind()),
            },
        };
        state.requests.push(RecordedRequest::ObjectCreate(req));
        Ok(ObjectCreateResponse {
            object_id: Some(object_id),
        })
    }

    async fn app_include_object(
        &self,
        req: AppIncludeObjectRequest,
    ) -> Result<AppIncludeObjectResponse> {
        let mut state = self.state.lock();
        let object_id = state
            .deployments
            .get(&(req.name.clone(), req.namespace))
            .cloned()
            .and_then(|app_id| state.app_objects.get(&app_id))
            .and_then(|objects| match &req.object_label {
                Some(label) => objects.get(label).cloned(),
                // No label selects the deployment's sole object, when
                // unambiguous.
                None if objects.len() == 1 => objects.values().next().cloned(),
                None => None,
            });
        state.requests.push(RecordedRequest::AppIncludeObject(req));
        Ok(AppIncludeObjectResponse { object_id })
    }

    async fn app_set_objects(&self, req: AppSetObjectsRequest) -> Result<()> {
        let mut state = self.state.lock();
        state
            .app_objects
            .insert(req.app_id.clone(), req.object_ids.clone());
        state.requests.push(RecordedRequest::AppSetObjects(req));
        Ok(())
    }

    async fn app_deploy(&self, req: AppDeployRequest) -> Result<()> {
        let mut state = self.state.lock();
        state
            .deployments
            .insert((req.name.clone(), req.namespace), req.app_id.clone());
        state.requests.push(RecordedRequest::AppDeploy(req));
        Ok(())
    }

    async fn app_client_disconnect(&self, req: AppClientDisconnectRequest) -> Result<()> {
        let mut state = self.state.lock();
        state
            .requests
            .push(RecordedRequest::AppClientDisconnect(req));
        Ok(())
    }

    async fn app_detach(&self, req: AppDetachRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.requests.push(RecordedRequest::AppDetach(req));
        Ok(())
    }

    async fn app_stream_logs(
        &self,
        req: AppStreamLogsRequest,
    ) -> Result<mpsc::Receiver<LogEntry>> {
        let mut state = self.state.lock();
        let entries: Vec<LogEntry> = match &req.last_entry_id {
            Some(cursor) => state
                .pending_logs
                .iter()
                .skip_while(|entry| entry.entry_id.as_str() <= cursor.as_str())
                .cloned()
                .collect(),
            None => state.pending_logs.clone(),
        };
        state.requests.push(RecordedRequest::AppStreamLogs(req));
        let (tx, rx) = mpsc::channel(entries.len().max(1));
        for entry in entries {
            // Capacity covers every queued entry, so this cannot block.
            tx.try_send(entry)
                .map_err(|err| BackendError::Transport(err.to_string()))?;
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn image_identities_are_content_addressed() {
        let backend = MockBackend::new();
        let app = backend
            .app_create(AppCreateRequest {
                client_id: "cl-test".into(),
                name: "t".into(),
            })
            .await
            .expect("app create");

        let request = ObjectCreateRequest {
            app_id: app.app_id.clone(),
            definition: ObjectDefinition::Image(ImageDefinition::debian_slim()),
            existing_object_id: None,
        };
        let first = backend.object_create(request.clone()).await.expect("create");
        let second = backend.object_create(request).await.expect("create");
        assert_eq!(first.object_id, second.object_id);
    }

    #[tokio::test]
    async fn existing_identities_are_preserved_for_stable_kinds() {
        let backend = MockBackend::new();
        let app = backend
            .app_create(AppCreateRequest {
                client_id: "cl-test".into(),
                name: "t".into(),
            })
            .await
            .expect("app create");

        let existing = ObjectId::new("qu-7");
        let created = backend
            .object_create(ObjectCreateRequest {
                app_id: app.app_id,
                definition: ObjectDefinition::Queue,
                existing_object_id: Some(existing.clone()),
            })
            .await
            .expect("create");
        assert_eq!(created.object_id, Some(existing));
    }

    #[tokio::test]
    async fn include_without_label_requires_a_single_object() {
        let backend = MockBackend::new();
        let app_id = AppId::new("ap-9");
        backend
            .app_set_objects(AppSetObjectsRequest {
                app_id: app_id.clone(),
                object_ids: [("q".to_owned(), ObjectId::new("qu-1"))].into(),
            })
            .await
            .expect("set objects");
        backend
            .app_deploy(AppDeployRequest {
                app_id: app_id.clone(),
                name: "my-queue".into(),
                namespace: Namespace::Account,
            })
            .await
            .expect("deploy");

        let resolved = backend
            .app_include_object(AppIncludeObjectRequest {
                app_id,
                name: "my-queue".into(),
                object_label: None,
                namespace: Namespace::Account,
            })
            .await
            .expect("include");
        assert_eq!(resolved.object_id, Some(ObjectId::new("qu-1")));
    }
}
