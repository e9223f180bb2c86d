//! API server for the Kiln build server.
//!
//! Accepts build triggers over HTTP and GitHub webhooks and reports on builds
//! and the worker.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
