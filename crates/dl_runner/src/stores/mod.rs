//! Storage implementations

pub mod registry;
pub mod status;
