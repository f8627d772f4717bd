//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::conversation::{Credentials, DateRange};

/// Environment variable that overrides `api.base_url`.
pub const API_URL_ENV: &str = "PERPLEXITY_API_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Top-level Perplexity OSS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Chat API base URL; `/chat` is appended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// TCP connect timeout. Streams themselves are never timed out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

/// Credentials forwarded as `x-api-key` / `x-user-id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id_env: Option<String>,
}

impl AuthConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn resolve_user_id(&self) -> Option<String> {
        resolve_secret_field(&self.user_id, &self.user_id_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Whether expert (pro search) mode may be switched on at all.
    #[serde(default = "default_true")]
    pub pro_mode_enabled: bool,

    /// Start with pro search on.
    #[serde(default)]
    pub pro_search: bool,

    /// Queries shorter than this (after trimming) are not sent.
    #[serde(default = "default_min_query_length")]
    pub min_query_length: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            pro_mode_enabled: true,
            pro_search: false,
            min_query_length: default_min_query_length(),
            start_date: None,
            end_date: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_query_length() -> usize {
    5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "perplexity_oss_stream=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    resolve_secret_with(direct, env_var, env_lookup)
}

fn resolve_secret_with(
    direct: &Option<String>,
    env_var: &Option<String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    env_var
        .as_deref()
        .and_then(lookup)
        .filter(|val| !val.is_empty())
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    substitute_vars(input, env_lookup)
}

fn substitute_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid");
    re.replace_all(input, |caps: &regex::Captures| {
        lookup(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::PerplexityError::Io)?;

        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::PerplexityError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Expand `~` in a user-supplied config path.
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).as_ref())
    }

    /// Chat API base URL, without a trailing slash.
    pub fn base_url(&self) -> String {
        std::env::var(API_URL_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.api.as_ref().and_then(|a| a.base_url.clone()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn connect_timeout_secs(&self) -> u64 {
        self.api
            .as_ref()
            .and_then(|a| a.connect_timeout_secs)
            .unwrap_or(10)
    }

    pub fn credentials(&self) -> Credentials {
        let auth = self.auth.clone().unwrap_or_default();
        Credentials {
            api_key: auth.resolve_api_key(),
            user_id: auth.resolve_user_id(),
        }
    }

    pub fn chat(&self) -> ChatConfig {
        self.chat.clone().unwrap_or_default()
    }

    pub fn pro_mode_enabled(&self) -> bool {
        self.chat().pro_mode_enabled
    }

    /// Initial pro search flag; always off when pro mode is disabled.
    pub fn pro_search(&self) -> bool {
        let chat = self.chat();
        chat.pro_mode_enabled && chat.pro_search
    }

    pub fn min_query_length(&self) -> usize {
        self.chat().min_query_length
    }

    pub fn date_range(&self) -> DateRange {
        let chat = self.chat();
        DateRange::new(chat.start_date, chat.end_date)
    }

    /// Get a config value by dotted path (e.g. "api.base_url", "chat.pro_search").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(url) = self.api.as_ref().and_then(|a| a.base_url.as_ref()) {
            if url.trim().is_empty() {
                errors.push("API base_url cannot be empty".to_string());
            } else if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(format!("API base_url must be an http(s) URL: {url}"));
            }
        }

        if self.credentials().api_key.is_none() {
            warnings.push("No API key configured; requests will be sent without x-api-key".into());
        }

        let chat = self.chat();
        if let (Some(start), Some(end)) = (chat.start_date, chat.end_date) {
            if start > end {
                errors.push(format!("chat.start_date {start} is after chat.end_date {end}"));
            }
        }
        if chat.pro_search && !chat.pro_mode_enabled {
            warnings.push("chat.pro_search is set but pro mode is disabled".into());
        }

        if let Some(logging) = &self.logging {
            if logging.format != "plain" && logging.format != "json" {
                warnings.push(format!("Unknown log format '{}', using plain", logging.format));
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Perplexity OSS data: `~/.perplexity_oss/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".perplexity_oss")
}
