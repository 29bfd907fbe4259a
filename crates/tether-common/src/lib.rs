//! ---
//! tether_section: "01-core-functionality"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Shared primitives and utilities for the client runtime."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
//! Shared primitives for the Tether client workspace.
//! This crate exposes configuration loading and logging setup utilities
//! consumed across the workspace.

pub mod config;
pub mod logging;

pub use config::{CaptureConfig, ClientConfig, LoggingConfig};
pub use logging::{init_tracing, LogFormat};
