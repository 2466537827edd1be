// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
        }
    }
}

/// Per-call limits applied to every model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_factor: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Materialize an intermediate artifact every N accepted records.
    pub materialize_every: usize,
    /// Cap on discarded candidates per iteration. Absent means unbounded.
    #[serde(default)]
    pub max_regenerations: Option<u32>,
    pub default_model: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            materialize_every: 5,
            max_regenerations: None,
            default_model: "GPT-4o".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Override for the durable session directory.
    #[serde(default)]
    pub dir: Option<String>,
    pub max_age_hours: u64,
    pub sweep_interval_seconds: u64,
    pub persist: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_age_hours: 24,
            sweep_interval_seconds: 3_600,
            persist: true,
        }
    }
}

impl SessionsConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(paths::sessions_dir)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3_600)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub max_message_chars: usize,
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 5_000,
            channel_capacity: 256,
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.client.max_attempts == 0 {
            anyhow::bail!("client.max_attempts must be at least 1");
        }
        if self.client.timeout_seconds == 0 {
            anyhow::bail!("client.timeout_seconds must be positive");
        }
        if self.generation.materialize_every == 0 {
            anyhow::bail!("generation.materialize_every must be positive");
        }
        Ok(())
    }
}
