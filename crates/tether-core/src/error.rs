//! ---
//! tether_section: "04-app-lifecycle-orchestration"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Lifecycle orchestration and identity tracking."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
use tether_proto::BackendError;

/// Shared result type for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the orchestrator and its subsystems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller misused the API: bad state transition, malformed
    /// reference, conflicting registration. Never retried.
    #[error("invalid usage: {0}")]
    Invalid(String),
    /// A named object or application does not exist remotely. The caller
    /// may recover, e.g. by deploying the missing application.
    #[error("not found: {0}")]
    NotFound(String),
    /// The backend returned an identity that contradicts what the client
    /// requested, or no identity at all.
    #[error("inconsistent identity: {0}")]
    Inconsistent(String),
    /// A remote call failed; propagated unmodified through the orchestrator.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// Operating-system failure in the capture subsystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
