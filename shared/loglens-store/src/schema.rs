//! Schema bootstrap statements
//!
//! Both backends expose the same three logical collections:
//! `log_entries`, `log_patterns` and `app_settings`. Every statement is
//! guarded with `IF NOT EXISTS` so bootstrap can run repeatedly.

pub const RECORDS_TABLE: &str = "log_entries";
pub const PATTERNS_TABLE: &str = "log_patterns";
pub const SETTINGS_TABLE: &str = "app_settings";

/// Row-store DDL
pub const POSTGRES_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS log_entries (
        id BIGSERIAL PRIMARY KEY,
        timestamp TIMESTAMP NOT NULL,
        log_level VARCHAR(10) NOT NULL,
        message VARCHAR(2000) NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_log_entries_timestamp ON log_entries (timestamp DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS log_patterns (
        id BIGSERIAL PRIMARY KEY,
        log_level VARCHAR(10) NOT NULL,
        log_template TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS app_settings (
        id BIGSERIAL PRIMARY KEY,
        setting_key VARCHAR(255) NOT NULL UNIQUE,
        setting_value TEXT NOT NULL
    )
    "#,
];

/// Column-store DDL
pub const CLICKHOUSE_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS log_entries
    (
        id UInt64,
        timestamp DateTime,
        log_level String,
        message String
    )
    ENGINE = MergeTree
    ORDER BY (id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS log_patterns
    (
        id UInt64,
        log_level String,
        log_template String
    )
    ENGINE = MergeTree
    ORDER BY (id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS app_settings
    (
        id UInt64,
        setting_key String,
        setting_value String
    )
    ENGINE = MergeTree
    ORDER BY (id)
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn creates_all_collections(ddl: &[&str]) -> bool {
        [RECORDS_TABLE, PATTERNS_TABLE, SETTINGS_TABLE].iter().all(|table| {
            ddl.iter()
                .any(|stmt| stmt.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)))
        })
    }

    #[test]
    fn test_both_backends_create_three_collections() {
        assert!(creates_all_collections(POSTGRES_DDL));
        assert!(creates_all_collections(CLICKHOUSE_DDL));
    }

    // Mutations cannot touch sort-key columns, and every column but `id` is editable
    #[test]
    fn test_clickhouse_tables_sorted_by_id_only() {
        for stmt in CLICKHOUSE_DDL {
            let order_by = stmt
                .lines()
                .map(str::trim)
                .find(|line| line.starts_with("ORDER BY"))
                .unwrap();
            assert_eq!(order_by, "ORDER BY (id)", "in {}", stmt);
        }
    }

    #[test]
    fn test_every_statement_is_idempotent() {
        for stmt in POSTGRES_DDL.iter().chain(CLICKHOUSE_DDL.iter()) {
            assert!(stmt.contains("IF NOT EXISTS"), "not idempotent: {}", stmt);
        }
    }
}
