//! Completion parsing
//!
//! Generated text is untrusted free-form Markdown. Queries are pulled out
//! of fenced code blocks with a small line-oriented state machine; analyses
//! are pulled out of an embedded JSON object when one is present.

use serde::Deserialize;

const FENCE: &str = "```";

/// Tags that mark a query block
const QUERY_TAGS: &[&str] = &["sql", "postgresql", "postgres", "clickhouse"];

/// Outcome of pulling a query out of a completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Extracted(String),
    /// Nothing left once fences, tags and terminators were removed
    Empty,
    /// A block was opened and never closed
    Unterminated,
}

#[derive(Debug)]
struct Block {
    tag: String,
    body: Vec<String>,
}

enum State {
    Outside,
    Inside(Block),
}

/// Split text into complete fenced blocks, noting whether one was left open
fn scan_blocks(text: &str) -> (Vec<Block>, bool) {
    let mut blocks = Vec::new();
    let mut state = State::Outside;

    for line in text.lines() {
        let trimmed = line.trim_start();
        state = match state {
            State::Outside if trimmed.starts_with(FENCE) => State::Inside(Block {
                tag: trimmed[FENCE.len()..].trim().to_ascii_lowercase(),
                body: Vec::new(),
            }),
            State::Outside => State::Outside,
            State::Inside(block) if trimmed.starts_with(FENCE) => {
                blocks.push(block);
                State::Outside
            }
            State::Inside(mut block) => {
                block.body.push(line.to_string());
                State::Inside(block)
            }
        };
    }

    (blocks, matches!(state, State::Inside(_)))
}

/// Extract the retrieval query from a completion.
///
/// Prefers the first block tagged as SQL, then the first fenced block of any
/// kind; with no fence lines at all the whole completion is the query.
pub fn extract_query(text: &str) -> Extraction {
    if !opens_fence(text) {
        return finish(text.trim());
    }

    let (blocks, dangling) = scan_blocks(text);

    if let Some(block) = blocks.iter().find(|b| QUERY_TAGS.contains(&b.tag.as_str())) {
        return finish(&block_interior(block));
    }
    if dangling {
        return Extraction::Unterminated;
    }
    match blocks.first() {
        Some(block) => finish(&block_interior(block)),
        None => Extraction::Empty,
    }
}

/// Backticks only delimit a block when they start a line
fn opens_fence(text: &str) -> bool {
    text.lines().any(|line| line.trim_start().starts_with(FENCE))
}

fn block_interior(block: &Block) -> String {
    let mut lines = block.body.iter().skip_while(|l| l.trim().is_empty()).peekable();

    // An untagged fence sometimes carries its language on the first line
    if block.tag.is_empty() {
        if let Some(first) = lines.peek() {
            if QUERY_TAGS.contains(&first.trim().to_ascii_lowercase().as_str()) {
                lines.next();
            }
        }
    }

    lines.cloned().collect::<Vec<_>>().join("\n")
}

fn finish(candidate: &str) -> Extraction {
    let query = candidate.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if query.is_empty() {
        Extraction::Empty
    } else {
        Extraction::Extracted(query.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct AnalysisPayload {
    #[serde(default)]
    analysis: Option<String>,
}

/// Extract the human-readable analysis from a completion.
///
/// Never fails: when no usable `{"analysis": ...}` object is found the
/// trimmed completion is returned as-is.
pub fn extract_analysis(text: &str) -> String {
    structured_region(text)
        .and_then(|region| serde_json::from_str::<AnalysisPayload>(&region).ok())
        .and_then(|payload| payload.analysis)
        .map(|analysis| analysis.trim().to_string())
        .filter(|analysis| !analysis.is_empty())
        .unwrap_or_else(|| text.trim().to_string())
}

fn structured_region(text: &str) -> Option<String> {
    if opens_fence(text) {
        let (blocks, _) = scan_blocks(text);
        if let Some(block) = blocks.iter().find(|b| b.tag == "json") {
            return Some(block.body.join("\n"));
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}
