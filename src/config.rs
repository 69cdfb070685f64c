use crate::cache::{DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL_SECONDS};
use crate::detection::DEFAULT_MIN_TEXT_LENGTH;
use crate::state::Settings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Unix socket the gateway listens on; each browser tab connects once.
    pub socket_path: String,
    /// Durable settings + counters record.
    pub state_path: String,
    /// Identity reported in commit records. Can be changed later through
    /// the status surface without editing this file.
    pub user_email: String,
    pub service: ServiceConfig,
    pub detection: DetectionConfig,
    pub cache: CacheConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub url: String,
    pub api_key: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Drafts at or below this many characters skip classification.
    pub min_text_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a held submission waits for a user decision before the
    /// gateway fails open.
    pub decision_seconds: u64,
    /// How long the coordinator keeps an orphaned pending cycle before
    /// releasing it.
    pub abandonment_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            socket_path: "/var/run/promptgate.sock".to_string(),
            state_path: "/var/lib/promptgate/state.yaml".to_string(),
            user_email: String::new(),
            service: ServiceConfig::default(),
            detection: DetectionConfig::default(),
            cache: CacheConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            url: "http://127.0.0.1:8000".to_string(),
            api_key: "dev-secret-key-change-in-production".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            min_text_length: DEFAULT_MIN_TEXT_LENGTH,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            decision_seconds: 5,
            abandonment_seconds: 30,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Settings seeded into a fresh state file on first startup.
    pub fn seed_settings(&self) -> Settings {
        Settings {
            user_email: self.user_email.clone(),
            service_url: self.service.url.clone(),
            api_key: self.service.api_key.clone(),
        }
    }

    /// Sanity checks behind `--test-config`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.socket_path.trim().is_empty() {
            anyhow::bail!("socket_path must not be empty");
        }
        if self.state_path.trim().is_empty() {
            anyhow::bail!("state_path must not be empty");
        }
        if !self.service.url.trim().is_empty() {
            url::Url::parse(&self.service.url)
                .map_err(|e| anyhow::anyhow!("invalid service url {}: {e}", self.service.url))?;
        }
        if self.timeouts.decision_seconds == 0 {
            anyhow::bail!("decision timeout must be at least one second");
        }
        if self.timeouts.abandonment_seconds < self.timeouts.decision_seconds {
            anyhow::bail!("abandonment ceiling must not be shorter than the decision timeout");
        }
        if self.cache.max_entries == 0 {
            anyhow::bail!("cache max_entries must be at least 1");
        }
        Ok(())
    }
}
