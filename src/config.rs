use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GmailError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub gmail: GmailApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub newsletter: NewsletterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    /// Credentials expiring within this many seconds are refreshed before use
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
    #[serde(default = "default_oauth_port")]
    pub oauth_port: u16,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_path: default_token_path(),
            refresh_skew_secs: default_refresh_skew_secs(),
            oauth_port: default_oauth_port(),
            scopes: default_scopes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailApiConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GmailApiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_enabled")]
    pub enabled: bool,
    /// Gmail allows 250 quota units per user per second
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: default_quota_enabled(),
            refill_per_sec: default_refill_per_sec(),
            burst: default_burst(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsletterSender {
    pub name: String,
    pub address: String,
}

impl NewsletterSender {
    fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
        }
    }

    pub fn bare_address(&self) -> String {
        crate::models::extract_address(&self.address)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsletterConfig {
    #[serde(default = "default_hours_back")]
    pub default_hours_back: u32,
    /// Cap on messages listed per digest query
    #[serde(default = "default_newsletter_max_results")]
    pub max_results: u32,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default = "default_senders")]
    pub senders: Vec<NewsletterSender>,
}

impl Default for NewsletterConfig {
    fn default() -> Self {
        Self {
            default_hours_back: default_hours_back(),
            max_results: default_newsletter_max_results(),
            fetch_concurrency: default_fetch_concurrency(),
            max_content_length: default_max_content_length(),
            senders: default_senders(),
        }
    }
}

impl NewsletterConfig {
    /// Bare addresses, so `Name <addr>` entries never reach a search query
    pub fn sender_addresses(&self) -> Vec<String> {
        self.senders.iter().map(NewsletterSender::bare_address).collect()
    }

    /// Configured friendly name for an address, matched case-insensitively
    pub fn sender_name(&self, address: &str) -> Option<&str> {
        self.senders
            .iter()
            .find(|s| s.bare_address().eq_ignore_ascii_case(address))
            .map(|s| s.name.as_str())
    }
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_path() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_refresh_skew_secs() -> u64 {
    300
}

fn default_oauth_port() -> u16 {
    8080
}

fn default_scopes() -> Vec<String> {
    crate::auth::GMAIL_SCOPES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_api_base_url() -> String {
    "https://gmail.googleapis.com/gmail/v1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_quota_enabled() -> bool {
    true
}

fn default_refill_per_sec() -> u32 {
    250
}

fn default_burst() -> u32 {
    500
}

fn default_hours_back() -> u32 {
    36
}

fn default_newsletter_max_results() -> u32 {
    50
}

fn default_fetch_concurrency() -> usize {
    5
}

fn default_max_content_length() -> usize {
    50_000
}

fn default_senders() -> Vec<NewsletterSender> {
    vec![
        NewsletterSender::new("Ben's Bites", "hello@bensbites.beehiiv.com"),
        NewsletterSender::new("The Neuron", "newsletter@theneurondaily.com"),
        NewsletterSender::new("The Rundown AI", "team@rundown.ai"),
        NewsletterSender::new("Last Week in AI", "hello@lastweekin.ai"),
        NewsletterSender::new("AlphaSignal", "newsletter@alphasignal.ai"),
    ]
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        let mut config = if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Self::default()
        } else {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to read config file: {}", e))
            })?;

            let config: Self = toml::from_str(&content).map_err(|e| {
                GmailError::ConfigError(format!("Failed to parse config file: {}", e))
            })?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over the file
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("OAUTH_PORT") {
            self.auth.oauth_port = port.trim().parse().map_err(|_| {
                GmailError::ConfigError(format!("OAUTH_PORT is not a valid port: '{}'", port))
            })?;
        }
        if let Ok(path) = std::env::var("GMAIL_MCP_CREDENTIALS") {
            self.auth.credentials_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GMAIL_MCP_TOKEN") {
            self.auth.token_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    GmailError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.auth.oauth_port == 0 {
            return Err(GmailError::ConfigError(
                "auth.oauth_port must be a fixed port, not 0".to_string(),
            ));
        }
        if self.auth.scopes.is_empty() {
            return Err(GmailError::ConfigError(
                "auth.scopes cannot be empty".to_string(),
            ));
        }
        if self.auth.refresh_skew_secs > 3600 {
            return Err(GmailError::ConfigError(
                "auth.refresh_skew_secs cannot exceed 3600 (access tokens live one hour)"
                    .to_string(),
            ));
        }

        if !self.gmail.api_base_url.starts_with("http://")
            && !self.gmail.api_base_url.starts_with("https://")
        {
            return Err(GmailError::ConfigError(format!(
                "gmail.api_base_url must be an http(s) URL, got '{}'",
                self.gmail.api_base_url
            )));
        }
        if self.gmail.request_timeout_secs == 0 {
            return Err(GmailError::ConfigError(
                "gmail.request_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(GmailError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts > 10 {
            return Err(GmailError::ConfigError(
                "retry.max_attempts cannot exceed 10".to_string(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(GmailError::ConfigError(
                "retry.initial_delay_ms cannot exceed retry.max_delay_ms".to_string(),
            ));
        }

        if self.quota.enabled && (self.quota.refill_per_sec == 0 || self.quota.burst == 0) {
            return Err(GmailError::ConfigError(
                "quota.refill_per_sec and quota.burst must be greater than 0".to_string(),
            ));
        }
        // A send costs 100 units; a smaller bucket could never admit one
        if self.quota.enabled && self.quota.burst < 100 {
            return Err(GmailError::ConfigError(
                "quota.burst must be at least 100 (cost of one send)".to_string(),
            ));
        }

        let newsletter = &self.newsletter;
        if newsletter.default_hours_back == 0 || newsletter.default_hours_back > 8760 {
            return Err(GmailError::ConfigError(
                "newsletter.default_hours_back must be between 1 and 8760".to_string(),
            ));
        }
        if newsletter.max_results == 0 || newsletter.max_results > 500 {
            return Err(GmailError::ConfigError(
                "newsletter.max_results must be between 1 and 500".to_string(),
            ));
        }
        if newsletter.fetch_concurrency == 0 {
            return Err(GmailError::ConfigError(
                "newsletter.fetch_concurrency must be at least 1".to_string(),
            ));
        }
        if newsletter.max_content_length < 100 {
            return Err(GmailError::ConfigError(
                "newsletter.max_content_length must be at least 100".to_string(),
            ));
        }
        if newsletter.senders.is_empty() {
            return Err(GmailError::ConfigError(
                "newsletter.senders cannot be empty".to_string(),
            ));
        }
        for sender in &newsletter.senders {
            if crate::validation::validate_email(&sender.bare_address()).is_err() {
                return Err(GmailError::ConfigError(format!(
                    "newsletter.senders contains an invalid address: '{}'",
                    sender.address
                )));
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
