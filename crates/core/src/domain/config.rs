//! Configuration management for Minstrel
//!
//! This module provides:
//! - Engine settings (stream format, analyzer size, editor refresh rate)
//! - The persisted band list, stored as TOML
//! - Named EQ presets
//! - The main config file manager with corrupt-file fallback

use crate::domain::analyzer::{DEFAULT_ORDER, MAX_ORDER, MIN_ORDER};
use crate::domain::audio::{ProcessSpec, MAX_CHANNELS};
use crate::domain::chain::{BandChain, BandSettings, MAX_BANDS};
use crate::domain::response::DEFAULT_CURVE_POINTS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

/// Stream and editor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Largest block the host will deliver, in frames
    pub block_size: usize,

    /// Number of audio channels
    pub channels: usize,

    /// Analyzer FFT order (`fft_size = 2^order`)
    pub fft_order: u32,

    /// Editor poll rate in Hz
    pub refresh_rate_hz: f32,

    /// Number of points on the response curve
    pub curve_points: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 512,
            channels: 2,
            fft_order: DEFAULT_ORDER,
            refresh_rate_hz: 15.0,
            curve_points: DEFAULT_CURVE_POINTS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(8000..=384_000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate {} outside 8000..=384000",
                self.sample_rate
            )));
        }
        if !(1..=8192).contains(&self.block_size) {
            return Err(ConfigError::Invalid(format!(
                "block_size {} outside 1..=8192",
                self.block_size
            )));
        }
        if !(1..=MAX_CHANNELS).contains(&self.channels) {
            return Err(ConfigError::Invalid(format!(
                "channels {} outside 1..={}",
                self.channels, MAX_CHANNELS
            )));
        }
        if !(MIN_ORDER..=MAX_ORDER).contains(&self.fft_order) {
            return Err(ConfigError::Invalid(format!(
                "fft_order {} outside {}..={}",
                self.fft_order, MIN_ORDER, MAX_ORDER
            )));
        }
        if !(self.refresh_rate_hz.is_finite() && self.refresh_rate_hz > 0.0 && self.refresh_rate_hz <= 120.0) {
            return Err(ConfigError::Invalid(format!(
                "refresh_rate_hz {} outside (0, 120]",
                self.refresh_rate_hz
            )));
        }
        if !(2..=4096).contains(&self.curve_points) {
            return Err(ConfigError::Invalid(format!(
                "curve_points {} outside 2..=4096",
                self.curve_points
            )));
        }
        Ok(())
    }

    /// Processing context described by these settings
    pub fn process_spec(&self) -> ProcessSpec {
        ProcessSpec::new(f64::from(self.sample_rate), self.block_size, self.channels)
    }

    /// Time between two editor refreshes
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.refresh_rate_hz.max(1.0))
    }
}

/// Complete Minstrel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EqConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub bands: Vec<BandSettings>,
}

impl EqConfig {
    /// Three flat bands: low shelf at 100 Hz, peak at 1 kHz, high shelf at 5 kHz
    pub fn factory_default() -> Self {
        Self {
            engine: EngineConfig::default(),
            bands: BandSettings::default_bands(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        if self.bands.len() > MAX_BANDS {
            return Err(ConfigError::Invalid(format!(
                "{} bands configured, at most {} supported",
                self.bands.len(),
                MAX_BANDS
            )));
        }
        for (index, band) in self.bands.iter().enumerate() {
            if !(band.frequency_hz.is_finite() && band.gain_db.is_finite() && band.q.is_finite()) {
                return Err(ConfigError::Invalid(format!(
                    "band {} has a non-finite parameter",
                    index
                )));
            }
        }
        Ok(())
    }

    /// Build a prepared chain from the band list
    pub fn to_chain(&self) -> BandChain {
        BandChain::from_settings(&self.bands, &self.engine.process_spec())
    }

    /// Capture a chain's bands alongside engine settings
    pub fn from_chain(engine: EngineConfig, chain: &BandChain) -> Self {
        Self {
            engine,
            bands: chain.settings(),
        }
    }

    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!(bands = config.bands.len(), "Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }
}

/// Named band sets stored as one TOML file each
pub struct PresetManager {
    preset_dir: PathBuf,
}

impl PresetManager {
    pub fn new(preset_dir: PathBuf) -> Self {
        Self { preset_dir }
    }

    fn preset_path(&self, name: &str) -> PathBuf {
        self.preset_dir.join(format!("{}.toml", name))
    }

    /// List all available presets
    #[instrument(skip(self))]
    pub async fn list_presets(&self) -> Result<Vec<String>> {
        let mut presets = Vec::new();
        if !self.preset_dir.exists() {
            return Ok(presets);
        }

        let mut entries = fs::read_dir(&self.preset_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "toml").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    presets.push(name.to_string());
                }
            }
        }

        presets.sort();
        debug!(count = presets.len(), "Listed presets");
        Ok(presets)
    }

    #[instrument(skip(self))]
    pub async fn load_preset(&self, name: &str) -> Result<EqConfig> {
        let path = self.preset_path(name);

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        EqConfig::load_from_file(&path).await
    }

    #[instrument(skip(self, config))]
    pub async fn save_preset(&self, name: &str, config: &EqConfig) -> Result<()> {
        config.save_to_file(self.preset_path(name)).await
    }

    #[instrument(skip(self))]
    pub async fn delete_preset(&self, name: &str) -> Result<()> {
        let path = self.preset_path(name);

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(name, "Preset deleted");
        Ok(())
    }

    pub fn preset_exists(&self, name: &str) -> bool {
        self.preset_path(name).exists()
    }
}

/// Manager for the main config file at `~/.config/minstrel/config.toml`
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");

        Self {
            config_dir,
            config_path,
        }
    }

    /// Manager for the platform config directory
    pub fn with_default_dir() -> Result<Self> {
        Ok(Self::new(Self::default_config_dir()?))
    }

    /// `~/.config/minstrel` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("minstrel"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Presets live next to the main config file
    pub fn preset_manager(&self) -> PresetManager {
        PresetManager::new(self.config_dir.join("presets"))
    }

    /// Load configuration from file
    ///
    /// A missing file yields the factory default, which is written out for
    /// next time. A corrupt file is backed up as `config.toml.corrupt` and the
    /// factory default is returned.
    #[instrument(skip(self))]
    pub async fn load(&self) -> EqConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = EqConfig::factory_default();

            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }

            return config;
        }

        match EqConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                EqConfig::factory_default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &EqConfig) -> Result<()> {
        config.validate()?;
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Delete the config file
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(
                path = %self.config_path.display(),
                "Configuration cleared"
            );
        }

        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
