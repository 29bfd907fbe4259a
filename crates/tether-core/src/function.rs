//! ---
//! tether_section: "04-app-lifecycle-orchestration"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Lifecycle orchestration and identity tracking."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
//! Function registration front-end: a thin builder over the blueprint
//! that turns an entrypoint plus attached metadata (image, secrets,
//! schedule, mounts) into a registered function specification and an
//! invokable handle distinct from the raw callable.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tether_proto::{
    ImageDefinition, MountDefinition, Namespace, ObjectId, RateLimit, Schedule, SecretDefinition,
    WebhookConfig, WebhookKind,
};

use crate::app::{App, ObjectEntry};
use crate::error::Result;
use crate::object::{FunctionSpec, ObjectSpec, Reference};

/// Tag of the shared default image, registered on demand.
pub const DEFAULT_IMAGE_TAG: &str = "_image";
/// Tag of the client support mount, registered on demand.
pub const CLIENT_MOUNT_TAG: &str = "_client_mount";
/// Deployment name of the globally published client support mount.
pub const CLIENT_MOUNT_NAME: &str = "tether-client-mount";

/// Options recognized when registering a function.
#[derive(Debug, Clone, Default)]
pub struct FunctionConfig {
    image: Option<Reference>,
    secrets: Vec<Reference>,
    mounts: Vec<Reference>,
    schedule: Option<Schedule>,
    rate_limit: Option<RateLimit>,
    gpu: bool,
    serialized: bool,
}

impl FunctionConfig {
    /// Start from defaults: shared image, no secrets, no schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the function in this image instead of the shared default.
    pub fn image(mut self, image: Reference) -> Self {
        self.image = Some(image);
        self
    }

    /// Attach one secret.
    pub fn secret(mut self, secret: Reference) -> Self {
        self.secrets.push(secret);
        self
    }

    /// Attach several secrets.
    pub fn secrets<I: IntoIterator<Item = Reference>>(mut self, secrets: I) -> Self {
        self.secrets.extend(secrets);
        self
    }

    /// Attach one extra mount.
    pub fn mount(mut self, mount: Reference) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Attach several extra mounts.
    pub fn mounts<I: IntoIterator<Item = Reference>>(mut self, mounts: I) -> Self {
        self.mounts.extend(mounts);
        self
    }

    /// Invoke the function on a schedule.
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Cap the invocation rate.
    pub fn rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Require a GPU.
    pub fn gpu(mut self, gpu: bool) -> Self {
        self.gpu = gpu;
        self
    }

    /// Ship the callable serialized instead of importing it remotely.
    pub fn serialized(mut self, serialized: bool) -> Self {
        self.serialized = serialized;
        self
    }
}

/// Registered, invokable proxy for a function. Distinct from the raw
/// callable; resolves to a live object once the app runs.
#[derive(Clone)]
pub struct FunctionHandle {
    tag: String,
    app: App,
}

impl FunctionHandle {
    /// The tag this function is registered under.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The function's identity, once the app is running.
    pub fn object_id(&self) -> Option<ObjectId> {
        self.app
            .inner
            .lock()
            .tag_to_object
            .get(&self.tag)
            .map(|handle| handle.object_id().clone())
    }

    /// Current lookup result for this function's tag.
    pub fn entry(&self) -> ObjectEntry {
        self.app.object(&self.tag)
    }
}

impl fmt::Debug for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionHandle")
            .field("tag", &self.tag)
            .finish()
    }
}

impl App {
    /// Register an image definition and return a reference to it.
    pub fn image(&self, tag: &str, definition: ImageDefinition) -> Result<Reference> {
        self.insert(tag, ObjectSpec::Image(definition))?;
        Ok(Reference::local(tag))
    }

    /// Register a mount definition and return a reference to it.
    pub fn mount(&self, tag: &str, definition: MountDefinition) -> Result<Reference> {
        self.insert(tag, ObjectSpec::Mount(definition))?;
        Ok(Reference::local(tag))
    }

    /// Register a secret definition and return a reference to it.
    pub fn secret(&self, tag: &str, definition: SecretDefinition) -> Result<Reference> {
        self.insert(tag, ObjectSpec::Secret(definition))?;
        Ok(Reference::local(tag))
    }

    /// Register a queue and return a reference to it.
    pub fn queue(&self, tag: &str) -> Result<Reference> {
        self.insert(tag, ObjectSpec::Queue)?;
        Ok(Reference::local(tag))
    }

    /// Register a function.
    pub fn function(
        &self,
        tag: &str,
        entrypoint: &str,
        config: FunctionConfig,
    ) -> Result<FunctionHandle> {
        self.register_function(tag, entrypoint, false, None, config)
    }

    /// Register a generator: a function yielding a stream of results.
    pub fn generator(
        &self,
        tag: &str,
        entrypoint: &str,
        config: FunctionConfig,
    ) -> Result<FunctionHandle> {
        self.register_function(tag, entrypoint, true, None, config)
    }

    /// Register a function exposed as an HTTP endpoint.
    pub fn webhook(
        &self,
        tag: &str,
        entrypoint: &str,
        method: &str,
        wait_for_response: bool,
        config: FunctionConfig,
    ) -> Result<FunctionHandle> {
        let webhook = WebhookConfig {
            kind: WebhookKind::Function,
            method: Some(method.to_owned()),
            wait_for_response,
        };
        self.register_function(tag, entrypoint, false, Some(webhook), config)
    }

    /// Register an ASGI application mounted behind an endpoint.
    pub fn asgi(
        &self,
        tag: &str,
        entrypoint: &str,
        wait_for_response: bool,
        config: FunctionConfig,
    ) -> Result<FunctionHandle> {
        let webhook = WebhookConfig {
            kind: WebhookKind::AsgiApp,
            method: None,
            wait_for_response,
        };
        self.register_function(tag, entrypoint, false, Some(webhook), config)
    }

    fn register_function(
        &self,
        tag: &str,
        entrypoint: &str,
        is_generator: bool,
        webhook: Option<WebhookConfig>,
        config: FunctionConfig,
    ) -> Result<FunctionHandle> {
        let image = match config.image {
            Some(reference) => reference,
            None => self.default_image()?,
        };
        let mut mounts = vec![self.client_mount()?];
        mounts.extend(config.mounts);

        let spec = FunctionSpec {
            entrypoint: entrypoint.to_owned(),
            is_generator,
            gpu: config.gpu,
            serialized: config.serialized,
            rate_limit: config.rate_limit,
            schedule: config.schedule,
            webhook,
            image,
            mounts,
            secrets: config.secrets,
        };
        self.insert(tag, ObjectSpec::Function(spec))?;
        Ok(FunctionHandle {
            tag: tag.to_owned(),
            app: self.clone(),
        })
    }

    fn default_image(&self) -> Result<Reference> {
        let mut inner = self.inner.lock();
        if !inner.blueprint.has(DEFAULT_IMAGE_TAG) {
            inner.blueprint.register(
                DEFAULT_IMAGE_TAG,
                Arc::new(ObjectSpec::Image(ImageDefinition::debian_slim())),
            )?;
        }
        Ok(Reference::local(DEFAULT_IMAGE_TAG))
    }

    fn client_mount(&self) -> Result<Reference> {
        let mut inner = self.inner.lock();
        if !inner.blueprint.has(CLIENT_MOUNT_TAG) {
            let spec = if self.config.sync_entrypoint {
                ObjectSpec::Mount(client_mount_definition())
            } else {
                ObjectSpec::Reference(Reference::deployed(
                    CLIENT_MOUNT_NAME,
                    None,
                    Namespace::Global,
                ))
            };
            inner.blueprint.register(CLIENT_MOUNT_TAG, Arc::new(spec))?;
        }
        Ok(Reference::local(CLIENT_MOUNT_TAG))
    }
}

fn client_mount_definition() -> MountDefinition {
    let local = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    MountDefinition {
        local_path: local.to_string_lossy().into_owned(),
        remote_path: "/pkg/tether".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn registering_a_function_registers_shared_infrastructure() {
        let app = App::new();
        app.function("square", "worker.square", FunctionConfig::new())
            .expect("register");

        assert!(app.is_registered("square"));
        assert!(app.is_registered(DEFAULT_IMAGE_TAG));
        assert!(app.is_registered(CLIENT_MOUNT_TAG));

        // Without sync_entrypoint the support mount is a global reference.
        let mount = app.spec(CLIENT_MOUNT_TAG).expect("client mount spec");
        let reference = mount.cross_app_reference().expect("global reference");
        assert_eq!(reference.app_name.as_deref(), Some(CLIENT_MOUNT_NAME));
        assert_eq!(reference.namespace, Namespace::Global);
    }

    #[test]
    fn explicit_image_suppresses_the_default() {
        let app = App::new();
        let image = app
            .image("base", ImageDefinition::debian_slim())
            .expect("register image");
        app.function(
            "f",
            "worker.f",
            FunctionConfig::new().image(image).gpu(true),
        )
        .expect("register function");

        assert!(!app.is_registered(DEFAULT_IMAGE_TAG));
        let spec = app.spec("f").expect("function spec");
        match spec.as_ref() {
            ObjectSpec::Function(function) => {
                assert_eq!(function.image.label.as_deref(), Some("base"));
                assert!(function.gpu);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn duplicate_function_tags_are_rejected() {
        let app = App::new();
        app.function("f", "worker.f", FunctionConfig::new())
            .expect("register");
        let err = app
            .function("f", "worker.f", FunctionConfig::new())
            .expect_err("duplicate tag");
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn shared_infrastructure_is_registered_once() {
        let app = App::new();
        app.function("f", "worker.f", FunctionConfig::new())
            .expect("register f");
        app.generator("g", "worker.g", FunctionConfig::new())
            .expect("register g");
        let tags: Vec<String> = {
            let inner = app.inner.lock();
            inner.blueprint.iter().map(|(tag, _)| tag.to_owned()).collect()
        };
        assert_eq!(
            tags,
            vec![DEFAULT_IMAGE_TAG, CLIENT_MOUNT_TAG, "f", "g"]
        );
    }

    #[test]
    fn webhooks_carry_their_http_configuration() {
        let app = App::new();
        app.webhook("hook", "worker.hook", "POST", true, FunctionConfig::new())
            .expect("register webhook");
        let spec = app.spec("hook").expect("spec");
        match spec.as_ref() {
            ObjectSpec::Function(function) => {
                let webhook = function.webhook.as_ref().expect("webhook config");
                assert_eq!(webhook.kind, WebhookKind::Function);
                assert_eq!(webhook.method.as_deref(), Some("POST"));
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }
}
