//! ---
//! tether_section: "04-app-lifecycle-orchestration"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Lifecycle orchestration and identity tracking."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Core client orchestration for Tether.
//!
//! An [`App`] aggregates declaratively registered object specifications
//! (functions, images, mounts, secrets, queues) and synchronizes their
//! identities with the remote backend across runs and redeploys. The
//! [`capture`] module intercepts a local stream's descriptor so remote
//! and local output can be interleaved by line.

pub mod app;
pub mod blueprint;
#[cfg(unix)]
pub mod capture;
pub mod client;
pub mod context;
pub mod error;
pub mod function;
pub mod object;
pub mod task_group;

pub use app::{App, AppState, ObjectEntry, RunningApp};
pub use blueprint::Blueprint;
#[cfg(unix)]
pub use capture::{can_capture, Capturable, CaptureSession, LineCallback};
pub use client::Client;
pub use context::{container_app, initialize_container_app, is_local, set_container_app};
pub use error::{Error, Result};
pub use function::{
    FunctionConfig, FunctionHandle, CLIENT_MOUNT_NAME, CLIENT_MOUNT_TAG, DEFAULT_IMAGE_TAG,
};
pub use object::{FunctionSpec, ObjectHandle, ObjectSpec, Reference};
pub use task_group::TaskContext;
