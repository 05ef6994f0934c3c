//! Runtime configuration loaded from the environment

use crate::error::OrchestrationError;
use crate::ledger::{NormalizerConfig, DEFAULT_EXCLUSION_TOKEN};
use crate::models::DispatchMode;
use crate::summarizer::SummaryCaps;
use crate::synthesizer::SynthesisConfig;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_TOKENS: u32 = 400;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MEMORY_PATH: &str = "memory_store.jsonl";
pub const DEFAULT_KEY_FILE: &str = "API.txt";
pub const DEFAULT_PORT: u16 = 8080;

lazy_static! {
    static ref KEY_LINE: Regex =
        Regex::new(r"(?im)^\s*(?:clave\s*api|api\s*key)\s*:\s*(\S+)").unwrap();
}

/// Language model connection settings.
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Everything the orchestrator needs besides the model handle.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub llm: LlmConfig,
    pub default_mode: DispatchMode,
    pub memory_path: Option<PathBuf>,
    pub normalizer: NormalizerConfig,
    pub caps: SummaryCaps,
    pub synthesis: SynthesisConfig,
    pub port: u16,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            default_mode: DispatchMode::Single,
            memory_path: None,
            normalizer: NormalizerConfig::default(),
            caps: SummaryCaps::default(),
            synthesis: SynthesisConfig::default(),
            port: DEFAULT_PORT,
        }
    }
}

impl OrchestratorConfig {
    /// Read configuration from the process environment (after `.env`).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = match get("OPENAI_API_KEY") {
            Some(key) => Some(key.trim().to_string()),
            None => {
                let path = get("CASHPOS_API_KEY_FILE").unwrap_or_else(|| DEFAULT_KEY_FILE.to_string());
                read_key_file(Path::new(&path))
            }
        };

        let llm = LlmConfig {
            api_key,
            api_base: get("OPENAI_API_BASE")
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: get("CASHPOS_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: parse_var(&get, "CASHPOS_TEMPERATURE", DEFAULT_TEMPERATURE)?,
            max_tokens: parse_var(&get, "CASHPOS_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
            timeout: Duration::from_secs(parse_var(&get, "CASHPOS_LLM_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
        };

        let default_mode = match get("CASHPOS_DISPATCH_MODE") {
            Some(raw) => raw.parse().map_err(OrchestrationError::ConfigError)?,
            None => DispatchMode::Single,
        };

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| OrchestrationError::ConfigError(format!("invalid port '{}'", raw)))?,
            None => DEFAULT_PORT,
        };

        let memory_path = Some(PathBuf::from(
            get("CASHPOS_MEMORY_PATH").unwrap_or_else(|| DEFAULT_MEMORY_PATH.to_string()),
        ));

        let normalizer = NormalizerConfig {
            exclusion_token: get("CASHPOS_EXCLUSION_TOKEN")
                .map(|t| t.trim().to_string())
                .unwrap_or_else(|| DEFAULT_EXCLUSION_TOKEN.to_string()),
        };

        let config = Self {
            llm,
            default_mode,
            memory_path,
            normalizer,
            caps: SummaryCaps::default(),
            synthesis: SynthesisConfig::default(),
            port,
        };
        debug!(config = ?config, "Configuration loaded");
        Ok(config)
    }
}

fn parse_var<T, F>(get: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| OrchestrationError::ConfigError(format!("invalid value for {}: '{}'", key, raw))),
        None => Ok(default),
    }
}

/// Extract the key from a `clave API: <key>` line. Missing file means no key.
pub fn read_key_file(path: &Path) -> Option<String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "API key file not readable");
            return None;
        }
    };
    let key = parse_key_line(&contents);
    if key.is_none() {
        warn!(path = %path.display(), "API key file has no 'clave API:' line");
    }
    key
}

pub fn parse_key_line(contents: &str) -> Option<String> {
    KEY_LINE
        .captures(contents)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
