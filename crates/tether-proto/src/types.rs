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
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identity assigned by the backend to a created object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Wrap a backend-assigned identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity assigned by the backend to an application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    /// Wrap a backend-assigned application identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kinds of remotely-created objects managed by an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Container image. Content-addressed by the backend.
    Image,
    /// Packaged directory shipped into the runtime environment.
    Mount,
    /// Named set of environment variables.
    Secret,
    /// Distributed FIFO queue.
    Queue,
    /// Remotely-invokable function.
    Function,
}

impl ObjectKind {
    /// Whether the backend preserves a requested identity for this kind.
    ///
    /// Content-addressed kinds derive their identity from their definition,
    /// so a redeploy may legitimately return a different identity than the
    /// one requested. For every other kind such a drift is an inconsistency.
    pub fn identity_stable(self) -> bool {
        !matches!(self, ObjectKind::Image)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ObjectKind::Image => "image",
            ObjectKind::Mount => "mount",
            ObjectKind::Secret => "secret",
            ObjectKind::Queue => "queue",
            ObjectKind::Function => "function",
        };
        f.write_str(label)
    }
}

/// Visibility scope for deployment names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Scoped to the deploying account.
    #[default]
    Account,
    /// Published for every account.
    Global,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Account => f.write_str("account"),
            Namespace::Global => f.write_str("global"),
        }
    }
}

/// One line of remote log output together with its resume cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Cursor that resumes the stream after this entry.
    pub entry_id: String,
    /// Remote task that produced the line, when attributable.
    #[serde(default)]
    pub task_id: Option<String>,
    /// The log line itself, terminator included.
    pub line: String,
}

/// Declarative definition of a container image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    /// Base image the build starts from.
    pub base: String,
    /// Build steps applied on top of the base.
    #[serde(default)]
    pub build_commands: Vec<String>,
}

impl ImageDefinition {
    /// The stock slim Debian image used when an app does not pick one.
    pub fn debian_slim() -> Self {
        Self {
            base: "debian-slim".to_owned(),
            build_commands: Vec::new(),
        }
    }
}

/// Declarative definition of a mount shipped into the runtime environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountDefinition {
    /// Path on the client machine the mount is packaged from.
    pub local_path: String,
    /// Path the mount is attached to inside the runtime environment.
    pub remote_path: String,
}

/// Declarative definition of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecretDefinition {
    /// Environment variables injected into the runtime environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Invocation schedule attached to a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Schedule {
    /// Fixed period between invocations, in seconds.
    Period(u64),
    /// Cron expression evaluated by the backend.
    Cron(String),
}

/// Invocation rate limit attached to a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "window", content = "limit", rename_all = "snake_case")]
pub enum RateLimit {
    /// Maximum invocations per second.
    PerSecond(u32),
    /// Maximum invocations per minute.
    PerMinute(u32),
}

/// How a webhook-exposed function is invoked over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookKind {
    /// Plain function exposed on a single endpoint.
    Function,
    /// Full ASGI application mounted behind the endpoint.
    AsgiApp,
}

/// HTTP exposure configuration for a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint flavour.
    pub kind: WebhookKind,
    /// REST method served by the endpoint. ASGI apps route every method.
    #[serde(default)]
    pub method: Option<String>,
    /// Whether requests block on and return the function response.
    pub wait_for_response: bool,
}

/// Fully-resolved function definition shipped to the backend.
///
/// Dependencies are expressed as already-created identities; the
/// orchestrator resolves them before issuing the create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Importable entrypoint executed by the remote worker.
    pub entrypoint: String,
    /// Whether the entrypoint yields a stream of results.
    pub is_generator: bool,
    /// Whether a GPU is required.
    pub gpu: bool,
    /// Whether the callable is shipped serialized rather than imported.
    pub serialized: bool,
    /// Optional invocation rate limit.
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    /// Optional invocation schedule.
    #[serde(default)]
    pub schedule: Option<Schedule>,
    /// Optional HTTP exposure.
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    /// Identity of the image the function runs in.
    pub image: ObjectId,
    /// Identities of mounts attached to the runtime environment.
    #[serde(default)]
    pub mounts: Vec<ObjectId>,
    /// Identities of secrets injected into the runtime environment.
    #[serde(default)]
    pub secrets: Vec<ObjectId>,
}

/// Kind-specific payload of an object-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "definition", rename_all = "snake_case")]
pub enum ObjectDefinition {
    /// Container image build definition.
    Image(ImageDefinition),
    /// Mount packaging definition.
    Mount(MountDefinition),
    /// Secret payload.
    Secret(SecretDefinition),
    /// Queue; no configuration beyond its existence.
    Queue,
    /// Function definition with resolved dependencies.
    Function(FunctionDefinition),
}

impl ObjectDefinition {
    /// The object kind this definition creates.
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectDefinition::Image(_) => ObjectKind::Image,
            ObjectDefinition::Mount(_) => ObjectKind::Mount,
            ObjectDefinition::Secret(_) => ObjectKind::Secret,
            ObjectDefinition::Queue => ObjectKind::Queue,
            ObjectDefinition::Function(_) => ObjectKind::Function,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_are_not_identity_stable() {
        assert!(!ObjectKind::Image.identity_stable());
        for kind in [
            ObjectKind::Mount,
            ObjectKind::Secret,
            ObjectKind::Queue,
            ObjectKind::Function,
        ] {
            assert!(kind.identity_stable(), "{kind} should be identity-stable");
        }
    }

    #[test]
    fn definition_reports_matching_kind() {
        let def = ObjectDefinition::Image(ImageDefinition::debian_slim());
        assert_eq!(def.kind(), ObjectKind::Image);
        assert_eq!(ObjectDefinition::Queue.kind(), ObjectKind::Queue);
    }
}
