//! ---
//! tether_section: "02-backend-rpc-data-model"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Backend request/response schema and service trait."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Wire-level data model for the Tether backend.
//!
//! The actual transport is out of scope for this workspace; the
//! [`RemoteService`] trait is the narrow seam the orchestrator consumes, and
//! [`mock::MockBackend`] provides an in-memory implementation for tests and
//! single-process integration.

pub mod mock;
pub mod service;
pub mod types;

/// Shared result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors surfaced by backend request/response operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend processed the request and rejected it.
    #[error("backend request failed: {0}")]
    RequestFailed(String),
    /// The request never reached the backend.
    #[error("transport error: {0}")]
    Transport(String),
}

pub use service::{
    AppClientDisconnectRequest, AppCreateRequest, AppCreateResponse, AppDeployRequest,
    AppDetachRequest, AppGetByDeploymentNameRequest, AppGetByDeploymentNameResponse,
    AppGetObjectsRequest, AppGetObjectsResponse, AppIncludeObjectRequest,
    AppIncludeObjectResponse, AppSetObjectsRequest, AppStreamLogsRequest, ObjectCreateRequest,
    ObjectCreateResponse, RemoteService,
};
pub use types::{
    AppId, FunctionDefinition, ImageDefinition, LogEntry, MountDefinition, Namespace,
    ObjectDefinition, ObjectId, ObjectKind, RateLimit, Schedule, SecretDefinition, WebhookConfig,
    WebhookKind,
};
