//! ---
//! tether_section: "04-app-lifecycle-orchestration"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Lifecycle orchestration and identity tracking."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
//! Process-wide container context.
//!
//! When code executes inside a remote worker, exactly one app instance
//! represents the current execution context. That instance lives behind
//! the narrow accessors here; ordinary local construction never observes
//! or mutates it.

use once_cell::sync::OnceCell;
use tether_proto::AppId;

use crate::app::App;
use crate::client::Client;
use crate::error::{Error, Result};

static CONTAINER_APP: OnceCell<App> = OnceCell::new();

/// Install the app representing the current container execution context.
/// Fails if one is already installed for this process.
pub fn set_container_app(app: App) -> Result<()> {
    CONTAINER_APP.set(app).map_err(|_| {
        Error::Invalid("a container app is already installed for this process".to_owned())
    })
}

/// The app representing the current container, when running remotely.
pub fn container_app() -> Option<&'static App> {
    CONTAINER_APP.get()
}

/// Whether this process runs locally rather than inside a remote worker.
pub fn is_local() -> bool {
    CONTAINER_APP.get().is_none()
}

/// Bootstrap the container app from the deployed object map and install
/// it as the process-wide context.
pub async fn initialize_container_app(
    client: &Client,
    app_id: AppId,
    task_id: &str,
) -> Result<&'static App> {
    let app = App::new();
    app.initialize_container(client, app_id, task_id).await?;
    set_container_app(app)?;
    Ok(container_app().expect("installed above"))
}
