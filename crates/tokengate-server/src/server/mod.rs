//! Server-side components of `tokengate-server`.
//!
//! ## Submodules
//!
//! - [`authority`] - HTTP client for the refresh endpoint tokens are checked
//!   against.
//! - [`config`] - CLI/environment configuration.
//! - [`service`] - axum routes and the shared service state.
//! - [`telemetry`] - Logging and optional OpenTelemetry export.

pub mod authority;
pub mod config;
pub mod service;
pub mod telemetry;
