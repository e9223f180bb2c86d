//! Core domain types and traits for the Kiln build server.
//!
//! This crate contains:
//! - Build identifiers
//! - The build record, its trigger payload and validation
//! - The error taxonomy shared by every crate
//! - Executor and notifier traits (the seams the worker calls out through)

pub mod build;
pub mod error;
pub mod executor;
pub mod id;
pub mod notifier;

pub use build::{BuildRecord, BuildStatus, BuildSummary, NewBuild, TriggerPayload};
pub use error::{Error, Result};
pub use executor::{BuildExecutor, BuildOutcome};
pub use id::BuildId;
pub use notifier::{Notifier, NotifyOutcome};
