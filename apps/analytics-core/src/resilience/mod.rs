//! Resilience Module - Circuit Breakers and Retries
//! Protects calls to unreliable upstream services

pub mod circuit_breaker;
pub mod error;
pub mod registry;
pub mod retry;
pub mod wrapper;

pub use circuit_breaker::{
    BreakerConfig, BreakerMetrics, BreakerOptions, BreakerPermit, CircuitBreaker, CircuitState,
    Rejection,
};
pub use error::{Classify, FailureClass, ResilienceError, TransportErrorKind};
pub use registry::ResilienceRegistry;
pub use retry::{
    FixedJitter, GiveUpReason, JitterSource, NoJitter, RandomJitter, RetryDecision, RetryOptions,
    RetryPolicy,
};
pub use wrapper::ResilientCaller;
