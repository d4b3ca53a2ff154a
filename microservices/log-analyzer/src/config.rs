//! Log Analyzer Configuration

use loglens_core::{env_flag, env_parse, LoglensError, Result, ServiceConfig};
use loglens_store::StoreConfig;

/// Text-generation client settings
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            timeout_secs: 60,
            max_tokens: 4000,
            temperature: 0.1,
        }
    }
}

impl GeneratorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            base_url: std::env::var("LLM_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("LLM_MODEL").unwrap_or(defaults.model),
            timeout_secs: env_parse("LLM_TIMEOUT_SECS", defaults.timeout_secs)?,
            max_tokens: env_parse("LLM_MAX_TOKENS", defaults.max_tokens)?,
            temperature: env_parse("LLM_TEMPERATURE", defaults.temperature)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub generator: GeneratorConfig,
    /// Records handed to the analysis step per question
    pub analysis_max_records: usize,
    pub seed_sample_data: bool,
}

impl AnalyzerConfig {
    pub fn from_env() -> Result<Self> {
        let analysis_max_records = env_parse("ANALYSIS_MAX_RECORDS", 100usize)?;
        if analysis_max_records == 0 {
            return Err(LoglensError::Config(
                "ANALYSIS_MAX_RECORDS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            service: ServiceConfig::from_env()?,
            store: StoreConfig::from_env()?,
            generator: GeneratorConfig::from_env()?,
            analysis_max_records,
            seed_sample_data: env_flag("SEED_SAMPLE_DATA", true),
        })
    }
}
