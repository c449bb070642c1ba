use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sweeps: SweepConfig,
    pub onboarding: OnboardingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/quorum.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub poll_expiry_secs: u64,
    pub event_reminders_secs: u64,
    pub past_events_secs: u64,
    pub registrations_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            poll_expiry_secs: 60,
            event_reminders_secs: 5 * 60,
            past_events_secs: 10 * 60,
            registrations_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OnboardingConfig {
    pub send_email: bool,
    pub send_dm: bool,
    /// Registrations submitted before this instant are ignored.
    pub registered_after: Option<DateTime<Utc>>,
}

impl Config {
    /// Load the config file, falling back to defaults when it does not
    /// exist yet.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            tracing::info!(path, "config file not found, using defaults");
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file '{path}'"))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("could not parse config file '{path}'"))?;
        Ok(config)
    }
}
