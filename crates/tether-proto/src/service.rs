//! ---
//! tether_section: "02-backend-rpc-data-model"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Backend request/response schema and service trait."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{AppId, LogEntry, Namespace, ObjectDefinition, ObjectId};
use crate::Result;

/// Request a fresh application identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCreateRequest {
    /// Identity of the requesting client session.
    pub client_id: String,
    /// Human-readable application name.
    pub name: String,
}

/// Response carrying the assigned application identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCreateResponse {
    /// Backend-assigned application identity.
    pub app_id: AppId,
}

/// Fetch the published tag→identity map of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppGetObjectsRequest {
    /// Application whose objects are fetched.
    pub app_id: AppId,
    /// Remote task performing the fetch, when called from inside a container.
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Published objects of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppGetObjectsResponse {
    /// Tag to identity, as last published.
    pub object_ids: BTreeMap<String, ObjectId>,
}

/// Look up a deployment by name to resume its application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppGetByDeploymentNameRequest {
    /// Deployment name.
    pub name: String,
    /// Namespace the name lives in.
    pub namespace: Namespace,
    /// Identity of the requesting client session.
    pub client_id: String,
}

/// Prior deployment state, if the name is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppGetByDeploymentNameResponse {
    /// Application identity bound to the deployment name, if any.
    pub app_id: Option<AppId>,
    /// Cursor of the last log entry seen by the previous deployment.
    #[serde(default)]
    pub last_log_entry_id: Option<String>,
}

/// Create one object server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreateRequest {
    /// Application the object belongs to.
    pub app_id: AppId,
    /// Kind-specific definition payload.
    pub definition: ObjectDefinition,
    /// Identity from a prior deployment the backend should try to preserve.
    #[serde(default)]
    pub existing_object_id: Option<ObjectId>,
}

/// Identity assigned to the created object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreateResponse {
    /// Assigned identity. Absent on a malformed backend response; the
    /// orchestrator treats that as a fatal inconsistency.
    pub object_id: Option<ObjectId>,
}

/// Resolve an object published by another deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIncludeObjectRequest {
    /// Application performing the resolution.
    pub app_id: AppId,
    /// Deployment name of the application being referenced.
    pub name: String,
    /// Tag within the referenced application; `None` selects its default
    /// object.
    #[serde(default)]
    pub object_label: Option<String>,
    /// Namespace the referenced deployment lives in.
    pub namespace: Namespace,
}

/// Resolution result; an absent identity signals not-found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppIncludeObjectResponse {
    /// Identity of the referenced object, if it exists.
    pub object_id: Option<ObjectId>,
}

/// Publish the full tag→identity map of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSetObjectsRequest {
    /// Application being published.
    pub app_id: AppId,
    /// Complete tag to identity mapping.
    pub object_ids: BTreeMap<String, ObjectId>,
}

/// Bind an application identity to a durable deployment name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDeployRequest {
    /// Application being deployed.
    pub app_id: AppId,
    /// Deployment name.
    pub name: String,
    /// Namespace to publish under.
    pub namespace: Namespace,
}

/// Notify the backend that the client is going away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppClientDisconnectRequest {
    /// Application whose client is disconnecting.
    pub app_id: AppId,
}

/// Let a running application outlive the client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDetachRequest {
    /// Application being detached.
    pub app_id: AppId,
}

/// Start streaming log entries for an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStreamLogsRequest {
    /// Application whose logs are streamed.
    pub app_id: AppId,
    /// Resume after this cursor; `None` starts from the beginning.
    #[serde(default)]
    pub last_entry_id: Option<String>,
}

/// The narrow backend seam consumed by the orchestrator.
///
/// Every method is a single request/response round trip; the transport
/// behind it is opaque to this workspace. Log streaming hands back the
/// receiving half of a channel that the backend closes when the stream
/// ends.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Acquire a fresh application identity.
    async fn app_create(&self, req: AppCreateRequest) -> Result<AppCreateResponse>;
    /// Fetch the published objects of an existing application.
    async fn app_get_objects(&self, req: AppGetObjectsRequest) -> Result<AppGetObjectsResponse>;
    /// Look up the application behind a deployment name.
    async fn app_get_by_deployment_name(
        &self,
        req: AppGetByDeploymentNameRequest,
    ) -> Result<AppGetByDeploymentNameResponse>;
    /// Create one object, optionally preserving a prior identity.
    async fn object_create(&self, req: ObjectCreateRequest) -> Result<ObjectCreateResponse>;
    /// Resolve an object published by another deployment.
    async fn app_include_object(
        &self,
        req: AppIncludeObjectRequest,
    ) -> Result<AppIncludeObjectResponse>;
    /// Publish the complete tag→identity map.
    async fn app_set_objects(&self, req: AppSetObjectsRequest) -> Result<()>;
    /// Bind the application to a deployment name.
    async fn app_deploy(&self, req: AppDeployRequest) -> Result<()>;
    /// Announce client disconnect so the backend can clean up.
    async fn app_client_disconnect(&self, req: AppClientDisconnectRequest) -> Result<()>;
    /// Detach the application from the client connection.
    async fn app_detach(&self, req: AppDetachRequest) -> Result<()>;
    /// Stream log entries until the backend closes the channel.
    async fn app_stream_logs(
        &self,
        req: AppStreamLogsRequest,
    ) -> Result<mpsc::Receiver<LogEntry>>;
}
