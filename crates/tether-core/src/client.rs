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
use std::sync::Arc;

use tether_proto::RemoteService;
use uuid::Uuid;

/// Session handle over the backend service.
///
/// The transport behind [`RemoteService`] is out of scope for this
/// workspace; the client only contributes a stable session identity.
#[derive(Clone)]
pub struct Client {
    client_id: String,
    service: Arc<dyn RemoteService>,
}

impl Client {
    /// Wrap a backend service with a fresh session identity.
    pub fn new(service: Arc<dyn RemoteService>) -> Self {
        Self {
            client_id: format!("cl-{}", Uuid::new_v4().simple()),
            service,
        }
    }

    /// Wrap a backend service with an explicit session identity.
    pub fn with_client_id(service: Arc<dyn RemoteService>, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            service,
        }
    }

    /// This session's identity, included in identity-acquiring requests.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The backend service seam.
    pub fn service(&self) -> &dyn RemoteService {
        self.service.as_ref()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .finish()
    }
}
