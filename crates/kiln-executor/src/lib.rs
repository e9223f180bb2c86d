//! Build execution backends for the Kiln build server.
//!
//! Provides executor implementations for running builds:
//! - Shell hooks and test command (production)
//! - No-op (always passes)
//! - A time limit wrapper around any executor

pub mod shell;
pub mod timeout;

pub use kiln_core::executor::{BuildExecutor, BuildOutcome, NoopExecutor};
pub use shell::ShellExecutor;
pub use timeout::TimeLimited;
