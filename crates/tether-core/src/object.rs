//! ---
//! tether_section: "04-app-lifecycle-orchestration"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Lifecycle orchestration and identity tracking."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Weak;

use parking_lot::Mutex;
use tether_proto::{
    ImageDefinition, MountDefinition, Namespace, ObjectId, ObjectKind, RateLimit, Schedule,
    SecretDefinition, WebhookConfig,
};

use crate::app::AppInner;

/// Unresolved pointer to an object, local to this app or published by
/// another deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Deployment name of another application. `None` means "this app".
    pub app_name: Option<String>,
    /// Tag within the target application. `None` selects the target app's
    /// default object.
    pub label: Option<String>,
    /// Namespace the target deployment lives in.
    pub namespace: Namespace,
}

impl Reference {
    /// Reference to an object registered on this same app.
    pub fn local(label: impl Into<String>) -> Self {
        Self {
            app_name: None,
            label: Some(label.into()),
            namespace: Namespace::default(),
        }
    }

    /// Reference to an object published by another deployment.
    pub fn deployed(
        app_name: impl Into<String>,
        label: Option<String>,
        namespace: Namespace,
    ) -> Self {
        Self {
            app_name: Some(app_name.into()),
            label,
            namespace,
        }
    }

    /// Whether this reference points into another application.
    pub fn is_cross_app(&self) -> bool {
        self.app_name.is_some()
    }

    /// Human-readable rendering used in not-found errors. The namespace is
    /// omitted when it is the default.
    pub fn describe(&self) -> String {
        let mut description = self.app_name.clone().unwrap_or_default();
        if let Some(label) = &self.label {
            if !description.is_empty() {
                description.push('.');
            }
            description.push_str(label);
        }
        if self.namespace != Namespace::default() {
            description.push_str(&format!(" (namespace {})", self.namespace));
        }
        description
    }
}

/// Specification of a function and its not-yet-resolved dependencies.
///
/// Dependencies stay symbolic until the creation phase, which resolves
/// each [`Reference`] to an identity right before the create call.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    /// Importable entrypoint executed by the remote worker.
    pub entrypoint: String,
    /// Whether the entrypoint yields a stream of results.
    pub is_generator: bool,
    /// Whether a GPU is required.
    pub gpu: bool,
    /// Whether the callable is shipped serialized rather than imported.
    pub serialized: bool,
    /// Optional invocation rate limit.
    pub rate_limit: Option<RateLimit>,
    /// Optional invocation schedule.
    pub schedule: Option<Schedule>,
    /// Optional HTTP exposure.
    pub webhook: Option<WebhookConfig>,
    /// Image the function runs in.
    pub image: Reference,
    /// Mounts attached to the runtime environment.
    pub mounts: Vec<Reference>,
    /// Secrets injected into the runtime environment.
    pub secrets: Vec<Reference>,
}

/// Declarative description of one remotely-created resource.
///
/// Immutable once registered in a blueprint; shared via `Arc` between the
/// blueprint and any specifications that capture it.
#[derive(Debug, Clone)]
pub enum ObjectSpec {
    /// Container image build definition.
    Image(ImageDefinition),
    /// Mount packaging definition.
    Mount(MountDefinition),
    /// Secret payload.
    Secret(SecretDefinition),
    /// Distributed queue.
    Queue,
    /// Function with symbolic dependencies.
    Function(FunctionSpec),
    /// Alias for an object published by another deployment.
    Reference(Reference),
}

impl ObjectSpec {
    /// The kind this specification creates, if it creates anything at all.
    /// Cross-app references resolve to whatever the target object is.
    pub fn kind(&self) -> Option<ObjectKind> {
        match self {
            ObjectSpec::Image(_) => Some(ObjectKind::Image),
            ObjectSpec::Mount(_) => Some(ObjectKind::Mount),
            ObjectSpec::Secret(_) => Some(ObjectKind::Secret),
            ObjectSpec::Queue => Some(ObjectKind::Queue),
            ObjectSpec::Function(_) => Some(ObjectKind::Function),
            ObjectSpec::Reference(_) => None,
        }
    }

    /// Whether this specification is a function.
    pub fn is_function(&self) -> bool {
        matches!(self, ObjectSpec::Function(_))
    }

    /// The cross-app reference this specification aliases, if any.
    pub fn cross_app_reference(&self) -> Option<&Reference> {
        match self {
            ObjectSpec::Reference(reference) if reference.is_cross_app() => Some(reference),
            _ => None,
        }
    }

    /// Progress message emitted when creation of this object starts.
    pub fn creating_message(&self) -> Option<String> {
        match self {
            ObjectSpec::Image(definition) => {
                Some(format!("Building image from {}...", definition.base))
            }
            ObjectSpec::Mount(definition) => {
                Some(format!("Creating mount {}...", definition.remote_path))
            }
            ObjectSpec::Secret(_) => Some("Creating secret...".to_owned()),
            ObjectSpec::Queue => Some("Creating queue...".to_owned()),
            ObjectSpec::Function(spec) => {
                Some(format!("Creating function {}...", spec.entrypoint))
            }
            ObjectSpec::Reference(_) => None,
        }
    }

    /// Progress message emitted once this object exists.
    pub fn created_message(&self) -> Option<String> {
        match self {
            ObjectSpec::Image(_) => Some("Built image.".to_owned()),
            ObjectSpec::Mount(definition) => {
                Some(format!("Created mount {}.", definition.remote_path))
            }
            ObjectSpec::Secret(_) => Some("Created secret.".to_owned()),
            ObjectSpec::Queue => Some("Created queue.".to_owned()),
            ObjectSpec::Function(spec) => Some(format!("Created function {}.", spec.entrypoint)),
            ObjectSpec::Reference(_) => None,
        }
    }
}

/// Runtime handle to an object that exists remotely.
///
/// Holds the concrete identity plus a weak back-reference to the owning
/// app, used for further lookups but never for ownership.
#[derive(Clone)]
pub struct ObjectHandle {
    object_id: ObjectId,
    app: Weak<Mutex<AppInner>>,
}

impl ObjectHandle {
    pub(crate) fn new(object_id: ObjectId, app: Weak<Mutex<AppInner>>) -> Self {
        Self { object_id, app }
    }

    /// The backend-assigned identity of this object.
    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    /// Whether the owning app is still alive.
    pub fn app_alive(&self) -> bool {
        self.app.strong_count() > 0
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("object_id", &self.object_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_includes_label_and_non_default_namespace() {
        let reference = Reference::deployed("other-app", Some("q".to_owned()), Namespace::Global);
        assert_eq!(reference.describe(), "other-app.q (namespace global)");

        let account = Reference::deployed("other-app", None, Namespace::Account);
        assert_eq!(account.describe(), "other-app");
    }

    #[test]
    fn only_cross_app_references_are_aliases() {
        let local = ObjectSpec::Reference(Reference::local("tag"));
        assert!(local.cross_app_reference().is_none());

        let remote =
            ObjectSpec::Reference(Reference::deployed("app", None, Namespace::Account));
        assert!(remote.cross_app_reference().is_some());
    }

    #[test]
    fn references_never_report_a_kind() {
        let spec = ObjectSpec::Reference(Reference::deployed("app", None, Namespace::Account));
        assert_eq!(spec.kind(), None);
        assert_eq!(ObjectSpec::Queue.kind(), Some(ObjectKind::Queue));
    }
}
