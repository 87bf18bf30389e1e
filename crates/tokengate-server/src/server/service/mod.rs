//! HTTP service for batch token checks.
//!
//! ## Structure
//!
//! - [`handler`] - `TokenService` and its routes.
//! - [`wire`] - JSON request and response bodies.
//! - [`error`] - request-level error responses.

pub mod error;
pub mod handler;
pub mod wire;
