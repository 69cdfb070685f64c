use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Aggregate counters. Monotonically incremented, exactly one writer
/// (the coordinator, or the offline CLI when no agent is running).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub prompts_observed: u64,
    pub pii_flagged: u64,
    pub rewrites_adopted: u64,
}

impl UsageCounters {
    pub fn record_cycle(&mut self, flagged: bool, rewrite_adopted: bool) {
        self.prompts_observed += 1;
        if flagged {
            self.pii_flagged += 1;
        }
        if rewrite_adopted {
            self.rewrites_adopted += 1;
        }
    }
}

/// Runtime settings: who the user is and where the remote collaborators
/// live. Seeded from the config file, mutated through the coordinator's
/// settings path while an agent runs, persisted immediately on change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub user_email: String,
    pub service_url: String,
    pub api_key: String,
}

impl Settings {
    /// Whether commit records can be forwarded at all. Missing identity
    /// or destination puts the agent in classify-only degraded mode.
    pub fn can_forward(&self) -> bool {
        !self.user_email.trim().is_empty() && !self.service_url.trim().is_empty()
    }

    /// Validation for the settings-update path. The error string is the
    /// ack payload shown on the status surface.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.user_email.trim().is_empty() && !self.user_email.contains('@') {
            return Err(format!("invalid user identity: {}", self.user_email));
        }
        if !self.service_url.trim().is_empty() {
            url::Url::parse(&self.service_url)
                .map_err(|e| format!("invalid service URL {}: {e}", self.service_url))?;
        }
        Ok(())
    }
}

/// The durable record: a small flat file holding settings and counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub settings: Settings,
    pub counters: UsageCounters,
}

/// Load-on-start, rewrite-atomically-on-mutation store for the agent's
/// durable state.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        StateStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<PersistedState> {
        if !self.path.exists() {
            log::debug!("state file {} not found, starting fresh", self.path.display());
            return Ok(PersistedState::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let state = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;
        Ok(state)
    }

    /// Write the full record out via a temp file and rename, so a crash
    /// mid-write never leaves a truncated state file behind.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create state directory: {}", parent.display())
                })?;
            }
        }
        let content = serde_yaml::to_string(state).context("Failed to serialize state")?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;
        Ok(())
    }
}
