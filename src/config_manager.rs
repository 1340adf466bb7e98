use std::{
    fs::File,
    io::{BufReader, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{bios_call::DEFAULT_CALL_TIMEOUT, bios_data::GpuPowerLevel};

type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open configuration file {path:?}: {error}")]
    Open {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("Failed to parse Json configuration: {error}")]
    Parse { error: serde_json::Error },
    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

// Which mechanism is used to reach the BIOS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Wmi,
    Emulated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportKind,

    // Upper bound for a single BIOS call
    pub call_timeout_ms: u64,

    // Preset applied once at start-up, if any
    pub level_on_start: Option<GpuPowerLevel>,
}

impl Config {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    // Parse a Json configuration string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|error| ConfigError::Parse { error })?;

        config.validate()
    }

    // Transport in use once the command line override is applied
    pub fn effective_transport(&self, emulate: bool) -> TransportKind {
        if emulate {
            TransportKind::Emulated
        } else {
            self.transport
        }
    }

    // The D-Bus daemon only runs on Unix, where the HP WMI BIOS
    // interface does not exist, so it must use the emulated BIOS
    pub fn check_daemon_transport(&self, emulate: bool) -> Result<()> {
        match self.effective_transport(emulate) {
            TransportKind::Emulated => Ok(()),
            TransportKind::Wmi => Err(ConfigError::Invalid {
                reason: "the D-Bus daemon cannot use the WMI BIOS transport, \
                         which is only available on Windows; set \
                         \"transport\": \"emulated\" or pass --emulate"
                    .to_string(),
            }),
        }
    }

    fn validate(self) -> Result<Self> {
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "call_timeout_ms must be greater than 0".to_string(),
            });
        }

        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::Wmi,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT.as_millis() as u64,
            level_on_start: None,
        }
    }
}

// Load the Json configuration file.
// A missing file falls back to the default configuration
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_path: &Path) -> Self {
        Self {
            config_path: config_path.to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<Config> {
        debug!("Parsing config file at: {:?}", self.config_path);

        let file = match File::open(&self.config_path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                warn!(
                    "Configuration file {:?} not found, using defaults",
                    self.config_path
                );

                return Ok(Config::default());
            }
            Err(error) => {
                return Err(ConfigError::Open {
                    path: self.config_path.clone(),
                    error,
                });
            }
        };

        let buf = BufReader::new(file);

        let config: Config = serde_json::from_reader(buf)
            .map_err(|error| ConfigError::Parse { error })?;
        let config = config.validate()?;

        trace!("Current configuration: {:?}", config);

        Ok(config)
    }
}
