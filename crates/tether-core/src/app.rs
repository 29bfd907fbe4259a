//! ---
//! tether_section: "04-app-lifecycle-orchestration"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Lifecycle orchestration and identity tracking."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
//! The app: an aggregate of remote objects sharing one lifecycle.
//!
//! An `App` owns the blueprint of declared objects, drives their creation
//! in dependency order when a run starts, reconciles identities across
//! redeploys, and tears everything down when the run ends.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tether_common::ClientConfig;
use tether_proto::{
    AppClientDisconnectRequest, AppCreateRequest, AppDeployRequest, AppDetachRequest,
    AppGetByDeploymentNameRequest, AppGetObjectsRequest, AppIncludeObjectRequest, AppId,
    AppSetObjectsRequest, AppStreamLogsRequest, FunctionDefinition, Namespace,
    ObjectCreateRequest, ObjectDefinition, ObjectId, ObjectKind,
};
use tracing::{debug, info, warn};

use crate::blueprint::Blueprint;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::object::{ObjectHandle, ObjectSpec, Reference};
use crate::task_group::TaskContext;

/// Lifecycle states of an app. `None` is both initial and terminal; every
/// run or deploy cycle returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    /// No run in progress.
    #[default]
    None,
    /// Acquiring identity and creating objects.
    Starting,
    /// Objects published; the caller's workload is executing.
    Running,
    /// The workload returned; teardown in progress.
    Stopping,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AppState::None => "none",
            AppState::Starting => "starting",
            AppState::Running => "running",
            AppState::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

pub(crate) struct AppInner {
    pub(crate) name: Option<String>,
    pub(crate) app_id: Option<AppId>,
    pub(crate) deployment_name: Option<String>,
    pub(crate) state: AppState,
    pub(crate) blueprint: Blueprint,
    pub(crate) tag_to_existing_id: BTreeMap<String, ObjectId>,
    pub(crate) tag_to_object: IndexMap<String, ObjectHandle>,
    pub(crate) client: Option<Client>,
}

/// Result of a tag lookup on an app that may or may not be running yet.
#[derive(Debug, Clone)]
pub enum ObjectEntry {
    /// The object exists remotely.
    Resolved(ObjectHandle),
    /// Not created yet; a reference that resolves once the app runs.
    Pending(Reference),
}

impl ObjectEntry {
    /// The live handle, when the object exists.
    pub fn handle(&self) -> Option<&ObjectHandle> {
        match self {
            ObjectEntry::Resolved(handle) => Some(handle),
            ObjectEntry::Pending(_) => None,
        }
    }

    /// The unresolved reference, when the object does not exist yet.
    pub fn reference(&self) -> Option<&Reference> {
        match self {
            ObjectEntry::Resolved(_) => None,
            ObjectEntry::Pending(reference) => Some(reference),
        }
    }
}

/// The top-level orchestrated aggregate of remote objects.
///
/// Cheap to clone; clones share the same underlying state. The same value
/// can be reused for multiple run/deploy cycles, since every cycle resets
/// it back to the `None` state.
#[derive(Clone)]
pub struct App {
    pub(crate) inner: Arc<Mutex<AppInner>>,
    pub(crate) config: ClientConfig,
}

/// View of an app between object publication and teardown, handed to the
/// caller's workload.
pub struct RunningApp {
    app: App,
    client: Client,
    app_id: AppId,
}

/// Resets volatile run state when the run scope unwinds, whether by
/// normal return, error, or cancellation of the future.
struct ResetGuard {
    inner: Arc<Mutex<AppInner>>,
}

impl Drop for ResetGuard {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.client = None;
        inner.state = AppState::None;
        inner.tag_to_existing_id.clear();
        inner.tag_to_object.clear();
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Create an anonymous app with default configuration.
    pub fn new() -> Self {
        Self::with_config(None, ClientConfig::default())
    }

    /// Create a named app with default configuration.
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_config(Some(name.into()), ClientConfig::default())
    }

    /// Create an app with explicit configuration.
    pub fn with_config(name: Option<String>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AppInner {
                name,
                app_id: None,
                deployment_name: None,
                state: AppState::None,
                blueprint: Blueprint::new(),
                tag_to_existing_id: BTreeMap::new(),
                tag_to_object: IndexMap::new(),
                client: None,
            })),
            config,
        }
    }

    /// The name supplied at construction, if any.
    pub fn provided_name(&self) -> Option<String> {
        self.inner.lock().name.clone()
    }

    /// Effective app name: the supplied one, else a name inferred from the
    /// invoking command line.
    pub fn name(&self) -> String {
        self.provided_name().unwrap_or_else(infer_app_name)
    }

    /// Identity assigned by the backend; `None` until a run or deploy has
    /// acquired one.
    pub fn app_id(&self) -> Option<AppId> {
        self.inner.lock().app_id.clone()
    }

    /// The deployment name, set only during deploys.
    pub fn deployment_name(&self) -> Option<String> {
        self.inner.lock().deployment_name.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AppState {
        self.inner.lock().state
    }

    /// Effective client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn set_state(&self, state: AppState) {
        self.inner.lock().state = state;
    }

    /// Register a specification under a tag.
    ///
    /// Only cross-app references may be registered directly as
    /// [`ObjectSpec::Reference`]; a same-app reference on the blueprint
    /// would alias nothing.
    pub fn insert(&self, tag: &str, spec: ObjectSpec) -> Result<()> {
        if let ObjectSpec::Reference(reference) = &spec {
            if !reference.is_cross_app() {
                return Err(Error::Invalid(
                    "only cross-app references can be registered on the blueprint".to_owned(),
                ));
            }
        }
        self.inner.lock().blueprint.register(tag, Arc::new(spec))
    }

    /// Whether a tag is registered on the blueprint.
    pub fn is_registered(&self, tag: &str) -> bool {
        self.inner.lock().blueprint.has(tag)
    }

    /// The specification registered under a tag.
    pub fn spec(&self, tag: &str) -> Option<Arc<ObjectSpec>> {
        self.inner.lock().blueprint.get(tag)
    }

    /// Look up a tag: a live handle once the app is running, otherwise a
    /// reference that resolves during the next run.
    pub fn object(&self, tag: &str) -> ObjectEntry {
        let inner = self.inner.lock();
        if inner.state == AppState::Running {
            if let Some(handle) = inner.tag_to_object.get(tag) {
                return ObjectEntry::Resolved(handle.clone());
            }
        }
        ObjectEntry::Pending(Reference::local(tag))
    }

    /// Run the app: create every registered object, publish the object
    /// map, execute `body`, and tear down.
    ///
    /// Teardown (backend disconnect plus state reset) runs on every exit
    /// path of `body`, error included.
    pub async fn run<F, Fut, T>(&self, client: &Client, body: F) -> Result<T>
    where
        F: FnOnce(RunningApp) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_inner(client, None, None, body).await
    }

    /// Run the app with an idle body, for headless schedule-driven apps.
    /// Honours `run_forever_timeout` from the configuration.
    pub async fn run_forever(&self, client: &Client) -> Result<()> {
        let limit = self.config.run_forever_timeout;
        self.run(client, move |_running| async move {
            match limit {
                Some(limit) => {
                    info!(timeout = ?limit, "running until timeout; interrupt to stop earlier");
                    tokio::time::sleep(limit).await;
                }
                None => {
                    info!("running forever; interrupt to stop");
                    loop {
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
            Ok(())
        })
        .await
    }

    /// Deploy the app under a durable name, binding its identity so the
    /// objects outlive this process. Returns the final application
    /// identity.
    ///
    /// The effective name is the explicit argument, else the app's own
    /// name. Redeploying under the same name preserves the application
    /// identity and per-tag object identities.
    pub async fn deploy(
        &self,
        name: Option<&str>,
        namespace: Namespace,
        client: &Client,
    ) -> Result<AppId> {
        if self.state() != AppState::None {
            return Err(Error::Invalid(
                "can only deploy an app that is not running".to_owned(),
            ));
        }
        let name = match name.map(str::to_owned).or_else(|| self.provided_name()) {
            Some(name) => name,
            None => {
                return Err(Error::Invalid(
                    "deployment needs a name: pass one to deploy(), or construct the app \
                     with App::named(\"some-name\")"
                        .to_owned(),
                ))
            }
        };
        self.inner.lock().deployment_name = Some(name.clone());

        let lookup = client
            .service()
            .app_get_by_deployment_name(AppGetByDeploymentNameRequest {
                name: name.clone(),
                namespace,
                client_id: client.client_id().to_owned(),
            })
            .await?;

        let deploy_name = name.clone();
        self.run_inner(
            client,
            lookup.app_id,
            lookup.last_log_entry_id,
            move |running| async move {
                client
                    .service()
                    .app_deploy(AppDeployRequest {
                        app_id: running.app_id().clone(),
                        name: deploy_name,
                        namespace,
                    })
                    .await?;
                Ok(())
            },
        )
        .await?;

        let app_id = self
            .app_id()
            .ok_or_else(|| Error::Inconsistent("application identity missing after deploy".to_owned()))?;
        info!(app_id = %app_id, deployment = %name, "app deployed");
        Ok(app_id)
    }

    /// Bootstrap this app from inside a remote container: adopt the
    /// deployed object map and go straight to `Running`.
    pub async fn initialize_container(
        &self,
        client: &Client,
        app_id: AppId,
        task_id: &str,
    ) -> Result<()> {
        let response = client
            .service()
            .app_get_objects(AppGetObjectsRequest {
                app_id: app_id.clone(),
                task_id: Some(task_id.to_owned()),
            })
            .await?;
        let mut inner = self.inner.lock();
        inner.app_id = Some(app_id);
        inner.client = Some(client.clone());
        for (tag, object_id) in response.object_ids {
            let handle = ObjectHandle::new(object_id, Arc::downgrade(&self.inner));
            inner.tag_to_object.insert(tag, handle);
        }
        // In the container the app has no local teardown; it runs until
        // the worker is torn down externally.
        inner.state = AppState::Running;
        Ok(())
    }

    async fn run_inner<F, Fut, T>(
        &self,
        client: &Client,
        existing_app_id: Option<AppId>,
        last_log_entry_id: Option<String>,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(RunningApp) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut inner = self.inner.lock();
            if inner.state != AppState::None {
                return Err(Error::Invalid(format!(
                    "cannot start an app already in state {}",
                    inner.state
                )));
            }
            inner.state = AppState::Starting;
            inner.client = Some(client.clone());
        }
        let _reset = ResetGuard {
            inner: self.inner.clone(),
        };

        let app_id = match existing_app_id {
            Some(existing) => {
                // Resuming a prior deployment: seed the existing-identity
                // map so object creation can preserve identities.
                let response = client
                    .service()
                    .app_get_objects(AppGetObjectsRequest {
                        app_id: existing.clone(),
                        task_id: None,
                    })
                    .await?;
                let mut inner = self.inner.lock();
                inner.tag_to_existing_id = response.object_ids;
                inner.app_id = Some(existing.clone());
                existing
            }
            None => {
                let response = client
                    .service()
                    .app_create(AppCreateRequest {
                        client_id: client.client_id().to_owned(),
                        name: self.name(),
                    })
                    .await?;
                let mut inner = self.inner.lock();
                inner.tag_to_existing_id.clear();
                inner.app_id = Some(response.app_id.clone());
                response.app_id
            }
        };
        debug!(app_id = %app_id, name = %self.name(), "application identity acquired");

        let mut background = TaskContext::new(self.config.logs_grace);
        background.spawn(stream_logs_loop(
            client.clone(),
            app_id.clone(),
            last_log_entry_id,
        ));

        let outcome = self.run_body(client, &app_id, body).await;

        // Stop the app server-side. This kills any still-running remote
        // task and drains the log stream, which lets the background task
        // finish inside its grace period.
        let disconnect = client
            .service()
            .app_client_disconnect(AppClientDisconnectRequest {
                app_id: app_id.clone(),
            })
            .await;
        background.shutdown().await;

        match (outcome, disconnect) {
            (Ok(value), Ok(())) => {
                info!(app_id = %app_id, "app completed");
                Ok(value)
            }
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(disconnect_err)) => {
                warn!(error = %disconnect_err, "disconnect failed during cleanup");
                Err(err)
            }
        }
    }

    async fn run_body<F, Fut, T>(&self, client: &Client, app_id: &AppId, body: F) -> Result<T>
    where
        F: FnOnce(RunningApp) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.create_all_objects(client, app_id).await?;

        let object_ids: BTreeMap<String, ObjectId> = {
            let inner = self.inner.lock();
            inner
                .tag_to_object
                .iter()
                .map(|(tag, handle)| (tag.clone(), handle.object_id().clone()))
                .collect()
        };
        client
            .service()
            .app_set_objects(AppSetObjectsRequest {
                app_id: app_id.clone(),
                object_ids,
            })
            .await?;

        self.set_state(AppState::Running);
        info!(app_id = %app_id, "app running");

        let running = RunningApp {
            app: self.clone(),
            client: client.clone(),
            app_id: app_id.clone(),
        };
        let value = body(running).await?;
        self.set_state(AppState::Stopping);
        Ok(value)
    }

    async fn create_all_objects(&self, client: &Client, app_id: &AppId) -> Result<()> {
        let mut tags: Vec<(String, bool)> = {
            let inner = self.inner.lock();
            inner
                .blueprint
                .iter()
                .map(|(tag, spec)| (tag.to_owned(), spec.is_function()))
                .collect()
        };
        // Functions are the only objects that reference other objects, so
        // creating every non-function object first guarantees a function's
        // dependencies have identities by the time it is created. The
        // stable sort keeps registration order within each group.
        tags.sort_by_key(|(_, is_function)| *is_function);

        for (tag, _) in tags {
            let (spec, existing) = {
                let inner = self.inner.lock();
                let spec = inner
                    .blueprint
                    .get(&tag)
                    .expect("tags are never removed during a run");
                (spec, inner.tag_to_existing_id.get(&tag).cloned())
            };
            debug!(tag = %tag, existing = ?existing, "creating object");
            let object_id = self
                .create_object(client, app_id, &tag, &spec, existing)
                .await?;
            let mut inner = self.inner.lock();
            let handle = ObjectHandle::new(object_id, Arc::downgrade(&self.inner));
            inner.tag_to_object.insert(tag, handle);
        }
        Ok(())
    }

    async fn create_object(
        &self,
        client: &Client,
        app_id: &AppId,
        tag: &str,
        spec: &ObjectSpec,
        existing: Option<ObjectId>,
    ) -> Result<ObjectId> {
        if let Some(message) = spec.creating_message() {
            info!(tag = %tag, step = %message, "creating object");
        }

        let object_id = if let Some(reference) = spec.cross_app_reference() {
            self.include_remote(client, app_id, reference).await?
        } else {
            let definition = self.build_definition(client, app_id, spec).await?;
            let response = client
                .service()
                .object_create(ObjectCreateRequest {
                    app_id: app_id.clone(),
                    definition,
                    existing_object_id: existing.clone(),
                })
                .await?;
            let object_id = response.object_id.ok_or_else(|| {
                Error::Inconsistent(format!("backend returned no identity for tag {tag}"))
            })?;
            if let Some(existing) = existing {
                // Content-addressed kinds may legitimately drift when their
                // definition changed; every other kind must keep the
                // identity it asked for.
                let stable = spec.kind().map_or(true, ObjectKind::identity_stable);
                if stable && object_id != existing {
                    return Err(Error::Inconsistent(format!(
                        "tag {tag} requested existing identity {existing} but the backend \
                         returned {object_id}"
                    )));
                }
            }
            object_id
        };

        if let Some(message) = spec.created_message() {
            info!(tag = %tag, step = %message, "object created");
        }
        Ok(object_id)
    }

    async fn build_definition(
        &self,
        client: &Client,
        app_id: &AppId,
        spec: &ObjectSpec,
    ) -> Result<ObjectDefinition> {
        match spec {
            ObjectSpec::Image(definition) => Ok(ObjectDefinition::Image(definition.clone())),
            ObjectSpec::Mount(definition) => Ok(ObjectDefinition::Mount(definition.clone())),
            ObjectSpec::Secret(definition) => Ok(ObjectDefinition::Secret(definition.clone())),
            ObjectSpec::Queue => Ok(ObjectDefinition::Queue),
            ObjectSpec::Function(function) => {
                let image = self
                    .resolve_reference(client, app_id, &function.image)
                    .await?;
                let mut mounts = Vec::with_capacity(function.mounts.len());
                for reference in &function.mounts {
                    mounts.push(self.resolve_reference(client, app_id, reference).await?);
                }
                let mut secrets = Vec::with_capacity(function.secrets.len());
                for reference in &function.secrets {
                    secrets.push(self.resolve_reference(client, app_id, reference).await?);
                }
                Ok(ObjectDefinition::Function(FunctionDefinition {
                    entrypoint: function.entrypoint.clone(),
                    is_generator: function.is_generator,
                    gpu: function.gpu,
                    serialized: function.serialized,
                    rate_limit: function.rate_limit,
                    schedule: function.schedule.clone(),
                    webhook: function.webhook.clone(),
                    image,
                    mounts,
                    secrets,
                }))
            }
            ObjectSpec::Reference(_) => Err(Error::Invalid(
                "cross-app references are resolved, never created".to_owned(),
            )),
        }
    }

    /// Resolve a reference to a concrete identity: either an object already
    /// materialized on this app, or one published by another deployment.
    pub(crate) async fn resolve_reference(
        &self,
        client: &Client,
        app_id: &AppId,
        reference: &Reference,
    ) -> Result<ObjectId> {
        if reference.app_name.is_none() && reference.label.is_none() {
            return Err(Error::Invalid(
                "reference with neither app name nor label points at nothing".to_owned(),
            ));
        }
        if reference.is_cross_app() {
            return self.include_remote(client, app_id, reference).await;
        }
        let label = reference
            .label
            .as_ref()
            .expect("same-app reference carries a label");
        let inner = self.inner.lock();
        let handle = inner.tag_to_object.get(label).unwrap_or_else(|| {
            // Creation ordering guarantees dependencies exist by now;
            // getting here is a bug in the registration code, not a
            // recoverable runtime condition.
            panic!("object {label} referenced before it was created")
        });
        Ok(handle.object_id().clone())
    }

    async fn include_remote(
        &self,
        client: &Client,
        app_id: &AppId,
        reference: &Reference,
    ) -> Result<ObjectId> {
        let name = reference.app_name.clone().ok_or_else(|| {
            Error::Invalid("cross-app resolution requires an app name".to_owned())
        })?;
        let response = client
            .service()
            .app_include_object(AppIncludeObjectRequest {
                app_id: app_id.clone(),
                name,
                object_label: reference.label.clone(),
                namespace: reference.namespace,
            })
            .await?;
        response.object_id.ok_or_else(|| {
            Error::NotFound(format!("could not find object {}", reference.describe()))
        })
    }
}

impl RunningApp {
    /// The backend-assigned application identity for this run.
    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// The underlying app.
    pub fn app(&self) -> &App {
        &self.app
    }

    /// Live handle for a tag created during this run.
    pub fn object(&self, tag: &str) -> Option<ObjectHandle> {
        self.app.inner.lock().tag_to_object.get(tag).cloned()
    }

    /// One-shot resolution of an object published by another deployment,
    /// without registering it on the blueprint.
    pub async fn include(
        &self,
        name: &str,
        label: Option<&str>,
        namespace: Namespace,
    ) -> Result<ObjectHandle> {
        let reference = Reference::deployed(name, label.map(str::to_owned), namespace);
        let object_id = self
            .app
            .include_remote(&self.client, &self.app_id, &reference)
            .await?;
        Ok(ObjectHandle::new(
            object_id,
            Arc::downgrade(&self.app.inner),
        ))
    }

    /// Let the app outlive this client connection.
    pub async fn detach(&self) -> Result<()> {
        self.client
            .service()
            .app_detach(AppDetachRequest {
                app_id: self.app_id.clone(),
            })
            .await?;
        Ok(())
    }
}

async fn stream_logs_loop(client: Client, app_id: AppId, cursor: Option<String>) {
    let request = AppStreamLogsRequest {
        app_id: app_id.clone(),
        last_entry_id: cursor,
    };
    match client.service().app_stream_logs(request).await {
        Ok(mut entries) => {
            let mut last_entry = None;
            while let Some(entry) = entries.recv().await {
                info!(
                    app_id = %app_id,
                    task_id = ?entry.task_id,
                    line = %entry.line.trim_end_matches(['\r', '\n']),
                    "remote output"
                );
                last_entry = Some(entry.entry_id);
            }
            debug!(app_id = %app_id, last_entry = ?last_entry, "log stream closed by server");
        }
        Err(err) => {
            warn!(app_id = %app_id, error = %err, "failed to open log stream");
        }
    }
}

fn infer_app_name() -> String {
    let mut args = std::env::args();
    let script = args
        .next()
        .map(|argv0| {
            Path::new(&argv0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or(argv0)
        })
        .unwrap_or_else(|| "app".to_owned());
    let mut parts = vec![script];
    parts.extend(args);
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inferred_name_starts_with_the_binary_name() {
        let name = infer_app_name();
        assert!(!name.is_empty());
        assert!(!name.starts_with('/'), "argv0 path should be reduced: {name}");
    }

    #[test]
    fn lookup_before_running_yields_a_pending_reference() {
        let app = App::new();
        let entry = app.object("later");
        let reference = entry.reference().expect("pending reference");
        assert_eq!(reference.label.as_deref(), Some("later"));
        assert!(reference.app_name.is_none());
        assert!(entry.handle().is_none());
    }

    #[test]
    fn same_app_references_cannot_be_registered() {
        let app = App::new();
        let err = app
            .insert("alias", ObjectSpec::Reference(Reference::local("other")))
            .expect_err("local reference must be rejected");
        assert!(matches!(err, Error::Invalid(_)));
    }
}
