//! Outbound integrations.

pub mod github;
