//! Sample data for a fresh store

use chrono::{Duration, NaiveDateTime, Timelike};
use loglens_core::{LogPattern, LogRecord};
use loglens_store::{Result, StorageGateway};
use tracing::info;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub patterns: usize,
    pub records: usize,
}

/// Insert sample patterns and records into whichever collections are empty
pub async fn seed_sample_data(store: &dyn StorageGateway, now: NaiveDateTime) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    if store.list_patterns().await?.is_empty() {
        for (level, template) in [
            ("INFO", "User {user_id} logged in from {ip_address}"),
            ("ERROR", "Database connection failed: {error_message}"),
            ("WARN", "High memory usage detected: {memory_percent}%"),
        ] {
            store.save_pattern(LogPattern::new(level, template)).await?;
            report.patterns += 1;
        }
    }

    if store.list_records(1).await?.is_empty() {
        let now = now.with_nanosecond(0).unwrap_or(now);
        for (age, level, message) in [
            (Duration::hours(2), "INFO", "User john_doe logged in from 192.168.1.100"),
            (Duration::hours(1), "ERROR", "Database connection failed: Connection timeout"),
            (Duration::minutes(30), "WARN", "High memory usage detected: 85%"),
        ] {
            store.save_record(LogRecord::new(now - age, level, message)).await?;
            report.records += 1;
        }
    }

    if report != SeedReport::default() {
        info!(patterns = report.patterns, records = report.records, "Seeded sample data");
    }
    Ok(report)
}
