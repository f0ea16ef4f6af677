pub mod cookies;
pub mod metrics;
