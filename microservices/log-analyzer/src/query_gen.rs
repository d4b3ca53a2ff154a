//! Query Generator
//!
//! Turns a natural-language question plus the pattern catalog into a
//! retrieval query in the active backend's dialect.

use loglens_core::LogPattern;
use loglens_store::Backend;
use std::fmt::{self, Write};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::client::{GenerationError, Result, TextGenerator};
use crate::extract::{extract_query, Extraction};

/// Retrieval query produced by the generator; never empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery(String);

impl GeneratedQuery {
    pub fn new(query: impl Into<String>) -> Option<Self> {
        let query = query.into();
        (!query.trim().is_empty()).then_some(Self(query))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneratedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dialect-specific fragments of the generation prompt
struct Dialect {
    name: &'static str,
    ddl: &'static str,
    extract_fn: &'static str,
    example: &'static str,
}

const POSTGRES: Dialect = Dialect {
    name: "PostgreSQL",
    ddl: "CREATE TABLE log_entries (\n  id BIGINT,\n  timestamp TIMESTAMP,\n  log_level VARCHAR(10),\n  message VARCHAR(2000)\n);",
    extract_fn: "substring(message from 'regex')",
    example: "WITH target_request AS (\n  SELECT substring(message from 'requestId=([a-zA-Z0-9-]+)') AS request_id\n  FROM log_entries\n  WHERE message ILIKE '%start send message. userId=abc-123%'\n)\nSELECT l.id, l.timestamp, l.log_level, l.message\nFROM log_entries l\nJOIN target_request t ON l.message LIKE '%' || t.request_id || '%'\nORDER BY l.timestamp DESC",
};

const CLICKHOUSE: Dialect = Dialect {
    name: "ClickHouse",
    ddl: "CREATE TABLE log_entries (\n  id UInt64,\n  timestamp DateTime,\n  log_level String,\n  message String\n) ENGINE = MergeTree ORDER BY (timestamp, id);",
    extract_fn: "extract(message, 'regex')",
    example: "WITH target_request AS (\n  SELECT extract(message, 'requestId=([a-zA-Z0-9-]+)') AS request_id\n  FROM log_entries\n  WHERE message ILIKE '%start send message. userId=abc-123%'\n)\nSELECT id, timestamp, log_level, message\nFROM log_entries\nWHERE position(message, (SELECT any(request_id) FROM target_request)) > 0\nORDER BY timestamp DESC",
};

fn dialect_for(backend: Backend) -> &'static Dialect {
    match backend {
        Backend::Postgres => &POSTGRES,
        Backend::ClickHouse => &CLICKHOUSE,
    }
}

/// Build the query-generation prompt for `backend`
pub fn build_prompt(backend: Backend, question: &str, patterns: &[LogPattern]) -> String {
    let d = dialect_for(backend);
    let mut p = String::with_capacity(4096);

    // Writing to a String cannot fail
    let _ = write!(
        p,
        "[ROLE]\n\
         You are a lead systems analyst and SQL architect specialising in log analysis on {name}. \
         You work autonomously, make reasonable assumptions about unclear requests, and always \
         return a query even when the data may be insufficient for a perfect answer.\n\n\
         [GOAL]\n\
         Translate the user's question into a correct, efficient, read-only query that finds the \
         most relevant rows in the log_entries table.\n\n\
         [CONTEXT]\n\
         Database: {name}\n\
         Table: log_entries\n\
         {ddl}\n\
         These four columns are the only ones that exist.\n\n\
         [PRINCIPLES]\n\
         - Ground the query in the provided log patterns. Never invent columns or message formats.\n\
         - Produce a single SELECT (optionally with WITH). Never modify data or structure.\n\
         - Always select id, timestamp, log_level, message and order by timestamp descending.\n\n\
         [STRATEGY]\n\
         - Direct search: when everything needed is in one message, filter with message ILIKE '%text%'.\n\
         - Linked search: when attributes live in different messages (a user id in one, the outcome \
           in another), find the shared identifier such as requestId or traceId in a CTE, then use it \
           to find the related messages. Never AND together attributes that never appear on one line.\n\
         - Fallback: when no chain can be built, return all messages about the main entity.\n\
         - Extract values with {extract_fn}.\n\n\
         [AMBIGUITY RULES]\n\
         - Never ask the user questions.\n\
         - For vague questions such as \"what happened to X\", assume the user cares about problems \
           and include log_level IN ('ERROR', 'WARN') for that entity.\n\n\
         [RESPONSE FORMAT]\n\
         Briefly explain your reasoning and assumptions, then give the query in exactly one fenced \
         block tagged sql.\n\n\
         [EXAMPLE]\n\
         Patterns:\n\
         INFO: start send message. userId={{}}, requestId={{}}\n\
         INFO: send completed success. requestId={{}}\n\
         WARN: send failed. requestId={{}}\n\
         Question: Was the message for userId=abc-123 delivered?\n\
         Answer:\n\
         The outcome messages carry only requestId, so the CTE resolves it from the start message.\n\
         ```sql\n{example}\n```\n\n",
        name = d.name,
        ddl = d.ddl,
        extract_fn = d.extract_fn,
        example = d.example,
    );

    let _ = write!(p, "[INPUT]\nQuestion: {}\n\n", question.trim());

    if patterns.is_empty() {
        p.push_str(
            "Patterns: none are registered. Make a best-effort match on the key terms of the question.\n",
        );
    } else {
        p.push_str("Patterns:\n");
        for pattern in patterns {
            let _ = writeln!(p, "{}: {}", pattern.log_level, pattern.log_template);
        }
    }

    p
}

/// Generates retrieval queries for one backend dialect
pub struct QueryGenerator {
    generator: Arc<dyn TextGenerator>,
    backend: Backend,
}

impl QueryGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, backend: Backend) -> Self {
        Self { generator, backend }
    }

    #[instrument(skip_all, fields(backend = %self.backend, patterns = patterns.len()))]
    pub async fn generate_query(
        &self,
        question: &str,
        patterns: &[LogPattern],
        credential: &str,
    ) -> Result<GeneratedQuery> {
        let prompt = build_prompt(self.backend, question, patterns);
        let completion = self.generator.complete(&prompt, credential).await?;

        match extract_query(&completion) {
            Extraction::Extracted(query) => {
                debug!(chars = query.len(), "Query extracted from completion");
                GeneratedQuery::new(query).ok_or(GenerationError::EmptyQuery)
            }
            Extraction::Empty => Err(GenerationError::EmptyQuery),
            Extraction::Unterminated => Err(GenerationError::UnterminatedFence),
        }
    }
}
