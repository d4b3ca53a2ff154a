//! Configuration shared by every LogLens service

use crate::error::{LoglensError, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub http_bind: String,
    pub log_level: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let http_bind = env::var("HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        if !http_bind.contains(':') {
            return Err(LoglensError::Config(format!(
                "Invalid HTTP_BIND (expected host:port): {}",
                http_bind
            )));
        }

        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "log-analyzer".to_string()),
            http_bind,
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Parse an optional numeric environment variable, failing on garbage
pub fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| LoglensError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

/// Read a boolean flag (`true`/`1` are truthy)
pub fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
