//! Configuration system (layered: defaults < TOML file < env < code).

use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use serde::Deserialize;

use crate::error::RtloopError;
use crate::tools::truncate::{OutputBudget, TRUNCATION_MARKER};

pub const DEFAULT_BASE_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a helpful AI assistant that can view files and edit code.";
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_TOOL_CALLS: usize = 10;
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 1000;
pub const DEFAULT_MAX_OUTPUT_LINES: usize = 15;
pub const DEFAULT_MAX_MALFORMED_EVENTS: usize = 3;

const API_KEY_ENV: &str = "OPENAI_API_KEY";
const BASE_URL_ENV: &str = "RTLOOP_BASE_URL";
const MODEL_ENV: &str = "RTLOOP_MODEL";
const RECEIVE_TIMEOUT_ENV: &str = "RTLOOP_RECEIVE_TIMEOUT_SECS";
const TOOL_TIMEOUT_ENV: &str = "RTLOOP_TOOL_TIMEOUT_SECS";
const MAX_TOOL_CALLS_ENV: &str = "RTLOOP_MAX_TOOL_CALLS";

/// Runtime configuration.
///
/// Resolution order, later layers winning:
/// 1. Built-in defaults
/// 2. A TOML file ([`RtloopConfig::load`])
/// 3. Environment variables and `.env` ([`RtloopConfig::apply_env`])
/// 4. Values set in code through the builder or field assignment
#[derive(Debug, Clone, Builder)]
pub struct RtloopConfig {
    #[builder(into)]
    pub api_key: Option<String>,
    #[builder(into, default = DEFAULT_BASE_URL.to_string())]
    pub base_url: String,
    #[builder(into, default = DEFAULT_MODEL.to_string())]
    pub model: String,
    #[builder(into, default = DEFAULT_INSTRUCTIONS.to_string())]
    pub instructions: String,
    #[builder(default = DEFAULT_RECEIVE_TIMEOUT)]
    pub receive_timeout: Duration,
    #[builder(default = DEFAULT_TOOL_TIMEOUT)]
    pub tool_timeout: Duration,
    #[builder(default = DEFAULT_MAX_TOOL_CALLS)]
    pub max_tool_calls: usize,
    #[builder(default = DEFAULT_MAX_OUTPUT_CHARS)]
    pub max_output_chars: usize,
    #[builder(default = DEFAULT_MAX_OUTPUT_LINES)]
    pub max_output_lines: usize,
    #[builder(default = DEFAULT_MAX_MALFORMED_EVENTS)]
    pub max_malformed_events: usize,
    pub session_dir: Option<PathBuf>,
}

impl Default for RtloopConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// On-disk representation; every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    instructions: Option<String>,
    receive_timeout_secs: Option<u64>,
    tool_timeout_secs: Option<u64>,
    max_tool_calls: Option<usize>,
    max_output_chars: Option<usize>,
    max_output_lines: Option<usize>,
    max_malformed_events: Option<usize>,
    session_dir: Option<PathBuf>,
}

impl RtloopConfig {
    /// Defaults overlaid with the environment.
    pub fn from_env() -> Result<Self, RtloopError> {
        Self::default().apply_env()
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, RtloopError> {
        let file: ConfigFile = toml::from_str(raw)
            .map_err(|e| RtloopError::Configuration(format!("invalid config file: {e}")))?;
        Ok(Self::default().overlay(file))
    }

    /// Load a TOML config file on top of the defaults.
    pub fn load(path: &Path) -> Result<Self, RtloopError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RtloopError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Overlay environment variables (loading `.env` if present).
    pub fn apply_env(self) -> Result<Self, RtloopError> {
        let _ = dotenvy::dotenv();
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values produced by `lookup`, keyed by environment variable name.
    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RtloopError> {
        let value_of = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = value_of(API_KEY_ENV) {
            self.api_key = Some(key);
        }
        if let Some(url) = value_of(BASE_URL_ENV) {
            self.base_url = url;
        }
        if let Some(model) = value_of(MODEL_ENV) {
            self.model = model;
        }
        if let Some(secs) = value_of(RECEIVE_TIMEOUT_ENV) {
            self.receive_timeout = Duration::from_secs(parse_env_number(RECEIVE_TIMEOUT_ENV, &secs)?);
        }
        if let Some(secs) = value_of(TOOL_TIMEOUT_ENV) {
            self.tool_timeout = Duration::from_secs(parse_env_number(TOOL_TIMEOUT_ENV, &secs)?);
        }
        if let Some(max) = value_of(MAX_TOOL_CALLS_ENV) {
            self.max_tool_calls = parse_env_number(MAX_TOOL_CALLS_ENV, &max)? as usize;
        }
        Ok(self)
    }

    fn overlay(mut self, file: ConfigFile) -> Self {
        if file.api_key.is_some() {
            self.api_key = file.api_key;
        }
        if let Some(url) = file.base_url {
            self.base_url = url;
        }
        if let Some(model) = file.model {
            self.model = model;
        }
        if let Some(instructions) = file.instructions {
            self.instructions = instructions;
        }
        if let Some(secs) = file.receive_timeout_secs {
            self.receive_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.tool_timeout_secs {
            self.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = file.max_tool_calls {
            self.max_tool_calls = max;
        }
        if let Some(chars) = file.max_output_chars {
            self.max_output_chars = chars;
        }
        if let Some(lines) = file.max_output_lines {
            self.max_output_lines = lines;
        }
        if let Some(max) = file.max_malformed_events {
            self.max_malformed_events = max;
        }
        if file.session_dir.is_some() {
            self.session_dir = file.session_dir;
        }
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), RtloopError> {
        if self.base_url.trim().is_empty() {
            return Err(RtloopError::Configuration(
                "Realtime base URL cannot be empty".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(RtloopError::Configuration("Model cannot be empty".into()));
        }
        if self.max_tool_calls == 0 {
            return Err(RtloopError::Configuration(
                "max_tool_calls must be at least 1".into(),
            ));
        }
        if self.receive_timeout.is_zero() || self.tool_timeout.is_zero() {
            return Err(RtloopError::Configuration(
                "timeouts must be greater than zero".into(),
            ));
        }
        if self.max_output_lines < 2 || self.max_output_chars <= TRUNCATION_MARKER.len() + 1 {
            return Err(RtloopError::Configuration(format!(
                "output budget too small to hold the '{TRUNCATION_MARKER}' marker"
            )));
        }
        Ok(())
    }

    /// Resolve the API key: explicit value first, then `OPENAI_API_KEY`.
    pub fn resolve_api_key(&self) -> Result<String, RtloopError> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| RtloopError::Authentication(format!("Missing {API_KEY_ENV}")))
    }

    pub fn output_budget(&self) -> OutputBudget {
        OutputBudget {
            max_chars: self.max_output_chars,
            max_lines: self.max_output_lines,
        }
    }

    /// Directory holding session logs: configured value, else the platform
    /// data directory.
    pub fn resolved_session_dir(&self) -> Option<PathBuf> {
        self.session_dir.clone().or_else(|| {
            directories::ProjectDirs::from("", "", "rtloop")
                .map(|dirs| dirs.data_dir().join("sessions"))
        })
    }
}

fn parse_env_number(key: &str, value: &str) -> Result<u64, RtloopError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| RtloopError::Configuration(format!("{key} must be a number, got '{value}'")))
}
