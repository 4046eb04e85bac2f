//! Analytics Core - analytical tool service
//! Resilient upstream access: retries with backoff behind per-label circuit breakers

pub mod config;
pub mod observability;
pub mod resilience;
pub mod upstream;

pub use config::{Config, ConfigError};
pub use resilience::{ResilienceError, ResilienceRegistry, ResilientCaller};
pub use upstream::{UpstreamClient, UpstreamError};
