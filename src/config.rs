//! Configuration loading and management
//!
//! Paths come from `HOME`; pedal ids and tunables come from
//! `~/.config/footpedal/config.json`. A missing or unreadable file leaves
//! the compiled-in defaults in place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::engine::debounce::DEFAULT_DEBOUNCE_INTERVAL;
use crate::engine::suppression::DEFAULT_SUPPRESSION_WINDOW;
use crate::engine::EngineSettings;
use crate::tap::PEDAL_KEYSTROKE_KEY_CODE;

/// FootSwitch vendor id
pub const DEFAULT_VENDOR_ID: u16 = 0x3553;
/// FootSwitch product id
pub const DEFAULT_PRODUCT_ID: u16 = 0xB001;

/// Errors that can occur while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("HOME is not set: {0}")]
    Home(#[from] std::env::VarError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("suppression window ({window_ms}ms) is shorter than the debounce interval ({debounce_ms}ms)")]
    WindowShorterThanDebounce { window_ms: u64, debounce_ms: u64 },
}

/// On-disk pedal configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PedalFile {
    #[serde(rename = "vendorID")]
    vendor_id: u16,
    #[serde(rename = "productID")]
    product_id: u16,
    debounce_ms: u64,
    suppression_window_ms: u64,
    suppressed_key_code: i64,
    socket_path: Option<PathBuf>,
}

impl Default for PedalFile {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            debounce_ms: DEFAULT_DEBOUNCE_INTERVAL.as_millis() as u64,
            suppression_window_ms: DEFAULT_SUPPRESSION_WINDOW.as_millis() as u64,
            suppressed_key_code: PEDAL_KEYSTROKE_KEY_CODE,
            socket_path: None,
        }
    }
}

impl PedalFile {
    fn read(path: &Path) -> Result<Option<Self>, ConfigError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        let file: Self = serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        file.validate()?;
        Ok(Some(file))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.suppression_window_ms < self.debounce_ms {
            return Err(ConfigError::WindowShorterThanDebounce {
                window_ms: self.suppression_window_ms,
                debounce_ms: self.debounce_ms,
            });
        }
        Ok(())
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Pedal configuration file that was consulted
    pub config_file: PathBuf,

    /// USB vendor id of the pedal
    pub vendor_id: u16,

    /// USB product id of the pedal
    pub product_id: u16,

    /// Engine tunables
    pub engine: EngineSettings,
}

impl Config {
    /// Load configuration from environment, config file and defaults
    pub fn load() -> Result<Self, ConfigError> {
        let home = std::env::var("HOME")?;
        Ok(Self::from_home(Path::new(&home)))
    }

    /// Resolve configuration relative to a home directory
    pub fn from_home(home: &Path) -> Self {
        let data_dir = home.join(".local").join("share").join("footpedal");
        let config_file = home.join(".config").join("footpedal").join("config.json");

        let file = match PedalFile::read(&config_file) {
            Ok(Some(file)) => {
                debug!(?config_file, "pedal config loaded");
                file
            }
            Ok(None) => {
                debug!(?config_file, "no pedal config, using defaults");
                PedalFile::default()
            }
            Err(e) => {
                warn!(%e, "ignoring pedal config, using defaults");
                PedalFile::default()
            }
        };

        let socket_path = file
            .socket_path
            .clone()
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        Self {
            socket_path,
            data_dir,
            config_file,
            vendor_id: file.vendor_id,
            product_id: file.product_id,
            engine: EngineSettings {
                debounce_interval: Duration::from_millis(file.debounce_ms),
                suppression_window: Duration::from_millis(file.suppression_window_ms),
                suppressed_key_code: file.suppressed_key_code,
                ..EngineSettings::default()
            },
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}
