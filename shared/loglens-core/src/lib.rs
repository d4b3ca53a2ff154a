//! LogLens Core - shared domain types and service infrastructure
//!
//! This crate provides:
//! - Log records, patterns, settings and query results
//! - The service trait every LogLens binary implements
//! - Error handling utilities
//! - Environment configuration helpers

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::{env_flag, env_parse, ServiceConfig};
pub use domain::*;
pub use error::{LoglensError, Result};
pub use service::{DependencyStatus, HealthStatus, LoglensService, MicroserviceRuntime, ReadinessStatus};
