// Configuration management module
// Handles loading, saving, and validating configuration

use crate::template::Template;
use anyhow::{Context, Result};
use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Player name that selects the first MPRIS player found on the bus
pub const AUTO_PLAYER: &str = "auto";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Discord application (client) id
    pub client_id: String,

    /// Discord IPC socket; searched in the usual runtime directories when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_socket: Option<PathBuf>,

    /// MPRIS player short name, e.g. "clementine" for org.mpris.MediaPlayer2.clementine
    pub player: String,

    /// Seconds between two presence updates
    pub poll_interval: u64,

    /// Seconds to wait before reconnecting after a failure
    pub retry_interval: u64,

    /// Upper bound in seconds for growing retry delays; fixed delay when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_interval: Option<u64>,

    /// First status line. Placeholders are metadata keys with ':' replaced by '-',
    /// or the bare field name (artist, title, album, ...)
    pub details_template: String,

    /// Second status line
    pub state_template: String,

    /// Image assets shown next to the status
    #[serde(default)]
    pub images: ImageConfig,

    /// Text cleanup configuration
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub large_key: String,
    pub large_text: String,
    pub playing_key: String,
    pub playing_text: String,
    pub paused_key: String,
    pub paused_text: String,
    pub stopped_key: String,
    pub stopped_text: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            large_key: "logo".to_string(),
            large_text: "Clementine".to_string(),
            playing_key: "playbut".to_string(),
            playing_text: "Playing".to_string(),
            paused_key: "pausebut".to_string(),
            paused_text: "Paused".to_string(),
            stopped_key: "stopbut".to_string(),
            stopped_text: "Stopped".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Enable text cleanup; off unless the user opts in
    pub enabled: bool,

    /// Regex patterns to remove from metadata text
    /// Applied in order, each pattern is removed from the text
    pub patterns: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            patterns: vec![
                r"\s*\[Explicit\]".to_string(),
                r"\s*\[Clean\]".to_string(),
                r"\s*\(Explicit\)".to_string(),
                r"\s*\(Clean\)".to_string(),
                r"\s*- Explicit".to_string(),
                r"\s*- Clean".to_string(),
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: "1163635305933451264".to_string(),
            discord_socket: None,
            player: "clementine".to_string(),
            poll_interval: 15,
            retry_interval: 15,
            max_retry_interval: None,
            details_template: "{artist} - {title}".to_string(),
            state_template: "{album}".to_string(),
            images: ImageConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Config {
    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;

        Ok(config_dir.join("mpris_presence.conf"))
    }

    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, or create a default file there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("Config file not found, creating default at {:?}", path);
            let default_config = Self::default();
            default_config.save_to(path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content).context("Failed to write config file")?;

        log::info!("Config saved to {:?}", path);

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() || !self.client_id.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!("client_id must be a numeric Discord application id");
        }

        if self.player.trim().is_empty() {
            anyhow::bail!("player must name an MPRIS player or be \"{}\"", AUTO_PLAYER);
        }

        if self.poll_interval == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.retry_interval == 0 {
            anyhow::bail!("retry_interval must be greater than 0");
        }

        if let Some(max) = self.max_retry_interval {
            if max < self.retry_interval {
                anyhow::bail!("max_retry_interval must not be smaller than retry_interval");
            }
        }

        self.details_template()?;
        self.state_template()?;

        if !self.cleanup.enabled && !self.cleanup.patterns.is_empty() {
            log::debug!("Text cleanup disabled, ignoring {} patterns", self.cleanup.patterns.len());
        }

        Ok(())
    }

    pub fn details_template(&self) -> Result<Template> {
        Template::parse(&self.details_template)
            .with_context(|| format!("Invalid details_template '{}'", self.details_template))
    }

    pub fn state_template(&self) -> Result<Template> {
        Template::parse(&self.state_template)
            .with_context(|| format!("Invalid state_template '{}'", self.state_template))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Retry policy applied after a failure of either side
    pub fn retry_backoff(&self) -> Box<dyn Backoff + Send> {
        let initial = Duration::from_secs(self.retry_interval);
        match self.max_retry_interval {
            Some(max) if max > self.retry_interval => Box::new(
                ExponentialBackoffBuilder::new()
                    .with_initial_interval(initial)
                    .with_randomization_factor(0.0)
                    .with_multiplier(2.0)
                    .with_max_interval(Duration::from_secs(max))
                    .with_max_elapsed_time(None)
                    .build(),
            ),
            _ => Box::new(Constant::new(initial)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn creates_default_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mpris_presence.conf");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn parses_partial_file_with_default_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpris_presence.conf");
        fs::write(
            &path,
            r#"
client_id = "42"
player = "auto"
poll_interval = 5
retry_interval = 10
max_retry_interval = 60
details_template = "{title}"
state_template = "by {artist}"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.player, AUTO_PLAYER);
        assert_eq!(config.max_retry_interval, Some(60));
        assert_eq!(config.images, ImageConfig::default());
        assert!(!config.cleanup.enabled);
    }

    #[test]
    fn rejects_invalid_values() {
        let bad_id = Config {
            client_id: "abc".to_string(),
            ..Config::default()
        };
        assert!(bad_id.validate().is_err());

        let zero_poll = Config {
            poll_interval: 0,
            ..Config::default()
        };
        assert!(zero_poll.validate().is_err());

        let bad_template = Config {
            details_template: "{artist".to_string(),
            ..Config::default()
        };
        assert!(bad_template.validate().is_err());

        let inverted = Config {
            retry_interval: 30,
            max_retry_interval: Some(10),
            ..Config::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn constant_backoff_by_default() {
        let mut backoff = Config::default().retry_backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(15)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn growing_backoff_is_capped() {
        let config = Config {
            retry_interval: 15,
            max_retry_interval: Some(40),
            ..Config::default()
        };
        let mut backoff = config.retry_backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(15)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(30)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(40)));

        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(15)));
    }
}
