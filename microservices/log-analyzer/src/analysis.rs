//! Analysis Generator
//!
//! Asks the text generator to explain a record set in terms of the
//! original question.

use loglens_core::LogRecord;
use std::fmt::Write;
use std::sync::Arc;
use tracing::instrument;

use crate::client::{Result, TextGenerator};
use crate::extract::extract_analysis;

/// Build the analysis prompt; records are listed in the order received
pub fn build_prompt(question: &str, records: &[LogRecord]) -> String {
    let mut p = String::with_capacity(1024 + records.len() * 128);

    p.push_str(
        "You are a senior operations engineer experienced in log analysis.\n\
         Analyse the logs below in the context of the user's question. Look for:\n\
         - temporal patterns and correlations\n\
         - sequences of events\n\
         - severity levels and escalation\n\
         - which records actually answer the question\n\n",
    );

    let _ = write!(p, "Question: \"{}\"\n\n", question.trim());

    if records.is_empty() {
        p.push_str("Records found: none. The query matched no log records.\n");
    } else {
        let _ = writeln!(p, "Records found ({}):", records.len());
        for record in records {
            let _ = writeln!(
                p,
                "[{}] {}: {}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.log_level,
                record.message
            );
        }
    }

    p.push_str(
        "\nAnswer with JSON only: {\"analysis\": \"plain-language explanation\", \
         \"relevant_logs\": [ids of the relevant records]}",
    );
    p
}

pub struct AnalysisGenerator {
    generator: Arc<dyn TextGenerator>,
}

impl AnalysisGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn analyze(&self, question: &str, records: &[LogRecord], credential: &str) -> Result<String> {
        let prompt = build_prompt(question, records);
        let completion = self.generator.complete(&prompt, credential).await?;
        Ok(extract_analysis(&completion))
    }
}
