//! Configuration Module
//! Loads settings from environment variables

use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::resilience::{BreakerConfig, BreakerOptions, RetryOptions, RetryPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub upstream_url: String,
    pub upstream_label: String,
    pub upstream_health_path: String,
    pub metrics_port: u16,
    pub environment: String,
    pub otlp_endpoint: Option<String>,
    pub retry_policy: RetryPolicy,
    pub breaker: BreakerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let retry_defaults = RetryOptions::default();
        let retry = RetryOptions {
            max_retries: parse_or("RETRY_MAX_RETRIES", retry_defaults.max_retries),
            base_delay_ms: parse_or("RETRY_BASE_DELAY_MS", retry_defaults.base_delay_ms),
            max_delay_ms: parse_or("RETRY_MAX_DELAY_MS", retry_defaults.max_delay_ms),
            exponential_base: parse_or("RETRY_EXPONENTIAL_BASE", retry_defaults.exponential_base),
            jitter_ms: parse_or("RETRY_JITTER_MS", retry_defaults.jitter_ms),
            retryable_status_codes: env::var("RETRY_STATUS_CODES")
                .ok()
                .map(|raw| parse_status_codes(&raw))
                .unwrap_or(retry_defaults.retryable_status_codes),
        };

        let breaker_defaults = BreakerOptions::default();
        let breaker = BreakerOptions {
            failure_threshold: parse_or("BREAKER_FAILURE_THRESHOLD", breaker_defaults.failure_threshold),
            success_threshold: parse_or("BREAKER_SUCCESS_THRESHOLD", breaker_defaults.success_threshold),
            timeout: parse_or("BREAKER_TIMEOUT_MS", breaker_defaults.timeout),
            reset_timeout_ms: parse_or("BREAKER_RESET_TIMEOUT_MS", breaker_defaults.reset_timeout_ms),
            half_open_max_calls: env::var("BREAKER_HALF_OPEN_MAX_CALLS")
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        Ok(Self {
            upstream_url: env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            upstream_label: env::var("UPSTREAM_LABEL")
                .unwrap_or_else(|_| "upstream".to_string()),
            upstream_health_path: env::var("UPSTREAM_HEALTH_PATH")
                .unwrap_or_else(|_| "/health".to_string()),
            metrics_port: parse_or("METRICS_PORT", 9100),
            environment: env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|v| !v.is_empty()),
            retry_policy: RetryPolicy::try_from(retry)?,
            breaker: BreakerConfig::try_from(breaker)?,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list; entries that are not status codes are skipped
fn parse_status_codes(raw: &str) -> Vec<u16> {
    raw.split(',')
        .filter_map(|code| code.trim().parse().ok())
        .collect()
}
