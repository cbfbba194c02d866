//! Configuration for the crawler, database, LLM and document output
//!
//! Loaded from `config.yml`; `${VAR}` placeholders are expanded from the
//! environment (after `.env` is read) and well-known variables override
//! file values.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::llm::openai::OPENAI_API_URL;
use crate::llm::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "config.yml";
pub const LOCK_FILE: &str = "slack_knowledge.lock";
pub const SLACK_API_URL: &str = "https://slack.com/api";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub token: String,
    pub api_base: String,
    /// Workspace subdomain used to build permalinks
    pub workspace: String,
    /// Channel ids to crawl
    pub channels: Vec<String>,
    pub page_size: u32,
    /// Fixed pause between page fetches
    pub page_delay_ms: u64,
    /// How far back a first crawl reaches
    pub default_days: i64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: SLACK_API_URL.to_string(),
            workspace: String::new(),
            channels: Vec::new(),
            page_size: 200,
            page_delay_ms: 1_200,
            default_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MySqlConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            database: "slack_knowledge".to_string(),
            user: "root".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: OPENAI_API_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DocsConfig {
    /// Where topic documents are written
    pub dir: PathBuf,
    /// Prompt template overrides; built-in prompts are used when absent
    pub prompts_dir: Option<PathBuf>,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("docs"),
            prompts_dir: None,
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub slack: SlackConfig,
    pub mysql: MySqlConfig,
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
    pub docs: DocsConfig,
    pub lock_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slack: SlackConfig::default(),
            mysql: MySqlConfig::default(),
            llm: LlmConfig::default(),
            retry: RetryPolicy::default(),
            docs: DocsConfig::default(),
            lock_file: PathBuf::from(LOCK_FILE),
        }
    }
}

impl Config {
    /// Load from `path`, or from `config.yml` in the current or parent
    /// directory, falling back to defaults. Environment overrides apply
    /// either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_dotenv();

        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                let parent = Path::new("..").join(DEFAULT_CONFIG_FILE);
                match [local, parent].into_iter().find(|p| p.exists()) {
                    // an unparsable file is an error
                    Some(found) => Self::load_from_file(found)?,
                    None => {
                        debug!("No config file found, using defaults");
                        Self::default()
                    }
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Parse a YAML file, expanding `${VAR}` placeholders first.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content, |key| std::env::var(key).ok())
    }

    pub fn from_yaml<F>(content: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expanded = expand_placeholders(content, &lookup);
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&expanded)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Environment variables take precedence over file values.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SLACK_TOKEN") {
            self.slack.token = v;
        }
        if let Some(v) = get("SLACK_WORKSPACE") {
            self.slack.workspace = v;
        }
        if let Some(v) = get("SLACK_CHANNELS") {
            self.slack.channels = v
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = get("MYSQL_HOST") {
            self.mysql.host = v;
        }
        if let Some(port) = get("MYSQL_PORT").and_then(|v| v.parse().ok()) {
            self.mysql.port = port;
        }
        if let Some(v) = get("MYSQL_DATABASE") {
            self.mysql.database = v;
        }
        if let Some(v) = get("MYSQL_USER") {
            self.mysql.user = v;
        }
        if let Some(v) = get("MYSQL_PASSWORD") {
            self.mysql.password = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("DOCS_DIR") {
            self.docs.dir = PathBuf::from(v);
        }
    }

    /// Channels to crawl: explicit ones win over configured ones.
    pub fn crawl_channels(&self, requested: &[String]) -> Result<Vec<String>> {
        let channels = if requested.is_empty() {
            self.slack.channels.clone()
        } else {
            requested.to_vec()
        };
        if channels.is_empty() {
            return Err(Error::ConfigError(
                "no channels configured (slack.channels, SLACK_CHANNELS or --channel)".to_string(),
            ));
        }
        Ok(channels)
    }

    pub fn require_slack_token(&self) -> Result<&str> {
        if self.slack.token.trim().is_empty() {
            return Err(Error::ConfigError("SLACK_TOKEN is not set".to_string()));
        }
        Ok(&self.slack.token)
    }
}

/// Replace `${VAR}` with the variable's value; unknown variables become empty.
fn expand_placeholders<F>(content: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    PLACEHOLDER
        .replace_all(content, |caps: &Captures| lookup(&caps[1]).unwrap_or_default())
        .into_owned()
}
