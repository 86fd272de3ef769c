use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, configs::*};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

impl Config {
    /// Reads `config.toml`, falling back to `config.default.toml`, and to
    /// built-in defaults when neither file exists.
    pub fn load() -> AnyResult<Self> {
        let config_path = ["config.toml", "config.default.toml"]
            .into_iter()
            .find(|p| std::path::Path::new(p).exists());

        let Some(config_path) = config_path else {
            return Ok(Self::default());
        };

        let config_str = std::fs::read_to_string(config_path)?;
        if config_str.trim().is_empty() {
            return Err(format!("{} is empty", config_path).into());
        }

        Self::from_toml(&config_str)
    }

    pub fn from_toml(source: &str) -> AnyResult<Self> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AnyResult<()> {
        if self.player.max_queued_frames == 0 {
            return Err("player.max_queued_frames must be greater than 0".into());
        }
        if self.sources.probe_timeout_ms == 0 {
            return Err("sources.probe_timeout_ms must be greater than 0".into());
        }
        if self.sources.max_concurrent_probes == 0 {
            return Err("sources.max_concurrent_probes must be greater than 0".into());
        }
        Ok(())
    }
}
