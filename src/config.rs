//! Configuration loader and validator for the listing watcher.
use crate::notify;
use crate::registry::{self, Site};
use reqwest::Url;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Telegram rejects messages longer than this many characters.
pub const TELEGRAM_MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Invalid site {site:?}: {reason}")]
    InvalidSite { site: String, reason: String },
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub telegram: Telegram,
    #[serde(default)]
    pub summarizer: Option<Summarizer>,
    /// Monitored sites; the built-in registry is used when empty.
    #[serde(default)]
    pub sites: Vec<Site>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct App {
    pub data_dir: String,
    pub archive_file: String,
    pub max_per_site: usize,
    pub batch_limit: usize,
    pub site_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub site_concurrency: usize,
    pub detail_max_chars: usize,
    pub user_agent: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            data_dir: ".".into(),
            archive_file: "ilanlar_veritabani.json".into(),
            max_per_site: 10,
            batch_limit: 3500,
            site_timeout_seconds: 90,
            request_timeout_seconds: 30,
            site_concurrency: 1,
            detail_max_chars: 6000,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into(),
        }
    }
}

impl App {
    pub fn archive_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.archive_file)
    }
}

/// Telegram delivery credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Telegram {
    pub bot_token: String,
    /// Numeric chat id or `@channelname`.
    pub chat_id: String,
}

/// OpenAI-compatible chat completion endpoint used for listing summaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summarizer {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_summarizer_base_url")]
    pub base_url: String,
    #[serde(default = "default_summarizer_model")]
    pub model: String,
    #[serde(default = "default_summarizer_max_chars")]
    pub max_chars: usize,
}

fn default_summarizer_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_summarizer_model() -> String {
    "gpt-4o-mini".into()
}

fn default_summarizer_max_chars() -> usize {
    3000
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Sites to scan, falling back to the built-in registry.
    pub fn sites(&self) -> Vec<Site> {
        if self.sites.is_empty() {
            registry::builtin()
        } else {
            self.sites.clone()
        }
    }

    /// Overlay credentials from the environment (`TELEGRAM_TOKEN`, `CHAT_ID`,
    /// `SUMMARIZER_API_KEY`). Blank values are ignored.
    pub fn apply_env<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(token) = get("TELEGRAM_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(chat) = get("CHAT_ID") {
            self.telegram.chat_id = chat;
        }
        if let Some(key) = get("SUMMARIZER_API_KEY") {
            match self.summarizer.as_mut() {
                Some(s) => s.api_key = key,
                None => {
                    self.summarizer = Some(Summarizer {
                        api_key: key,
                        base_url: default_summarizer_base_url(),
                        model: default_summarizer_model(),
                        max_chars: default_summarizer_max_chars(),
                    })
                }
            }
        }
        self.telegram.bot_token = normalize_token(&self.telegram.bot_token);
    }
}

/// Tokens are sometimes pasted with the `bot` prefix from the API URL.
fn normalize_token(token: &str) -> String {
    let token = token.trim();
    token.strip_prefix("bot").unwrap_or(token).to_string()
}

/// Load configuration from a YAML file, overlay the process environment and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    finish(cfg)
}

/// Like [`load`], but a missing file yields the built-in defaults so the
/// watcher can run from environment credentials alone.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    match fs::read_to_string(path) {
        Ok(content) => finish(serde_yaml::from_str(&content)?),
        Err(err) if err.kind() == ErrorKind::NotFound => finish(Config::default()),
        Err(err) => Err(err.into()),
    }
}

fn finish(mut cfg: Config) -> Result<Config, ConfigError> {
    cfg.apply_env(|name| std::env::var(name).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.chat_id.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.chat_id must be non-empty"));
    }

    if cfg.app.archive_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.archive_file must be non-empty"));
    }
    if cfg.app.max_per_site == 0 {
        return Err(ConfigError::Invalid("app.max_per_site must be > 0"));
    }
    if cfg.app.batch_limit == 0 {
        return Err(ConfigError::Invalid("app.batch_limit must be > 0"));
    }
    // The header is sent on top of every batch.
    if cfg.app.batch_limit + notify::header_reserve() > TELEGRAM_MAX_MESSAGE_CHARS {
        return Err(ConfigError::Invalid(
            "app.batch_limit plus the message header must fit the Telegram message limit",
        ));
    }
    if cfg.app.site_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("app.site_timeout_seconds must be > 0"));
    }
    if cfg.app.request_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("app.request_timeout_seconds must be > 0"));
    }
    if cfg.app.site_concurrency == 0 {
        return Err(ConfigError::Invalid("app.site_concurrency must be > 0"));
    }

    if let Some(s) = &cfg.summarizer {
        if s.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("summarizer.api_key must be non-empty"));
        }
        if s.model.trim().is_empty() {
            return Err(ConfigError::Invalid("summarizer.model must be non-empty"));
        }
        if s.max_chars == 0 {
            return Err(ConfigError::Invalid("summarizer.max_chars must be > 0"));
        }
    }

    let mut seen = HashSet::new();
    for site in &cfg.sites {
        validate_site(site)?;
        if !seen.insert(site.source.trim()) {
            return Err(ConfigError::InvalidSite {
                site: site.source.clone(),
                reason: "duplicate source name".into(),
            });
        }
    }

    Ok(())
}

fn validate_site(site: &Site) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidSite {
        site: site.source.clone(),
        reason,
    };
    if site.source.trim().is_empty() {
        return Err(invalid("source must be non-empty".into()));
    }
    Url::parse(&site.entry_url).map_err(|e| invalid(format!("entry_url: {e}")))?;
    for rule in site.rules() {
        Selector::parse(rule).map_err(|e| invalid(format!("selector {rule:?}: {e:?}")))?;
    }
    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  archive_file: "ilanlar_veritabani.json"
  max_per_site: 10
  batch_limit: 3500
  site_timeout_seconds: 90
  request_timeout_seconds: 30
  site_concurrency: 1
  detail_max_chars: 6000

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  chat_id: "123456789"

summarizer:
  api_key: "YOUR_API_KEY"
  model: "gpt-4o-mini"
  max_chars: 3000

sites:
  - source: "Anbean"
    entry_url: "https://anbeankampus.co/ilanlar/"
    card_rule: ".joblistings-jobItem"
    title_rule: "h6"
    link_rule: "a"
    date_rule: ".mini-eventCard-dateItem"
  - source: "Youthall"
    entry_url: "https://www.youthall.com/tr/jobs/"
    card_rule: ".jobs"
    title_rule: "h5"
    link_rule: "a"
    date_rule: ".jobs-content-bottom"
    deep_scrape: true
"#
}
