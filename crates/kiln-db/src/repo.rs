//! Repository traits and implementations.

pub mod build;
pub mod memory;

pub use build::{BuildRepo, PgBuildRepo};
pub use memory::MemoryBuildRepo;
