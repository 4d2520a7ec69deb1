use anyhow::{Result, bail};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

/// Environment variable that overrides the configured desk address
pub const MAC_ENV_VAR: &str = "DESK_MAC";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    /// Sitting height, machine millimetres (0 = lowest position)
    pub sit: f64,

    /// Standing height, machine millimetres
    pub stand: f64,

    /// Minutes spent sitting before the desk rises
    pub sit_duration: u64,

    /// Minutes spent standing before the desk lowers
    pub stand_duration: u64,

    /// Desk Bluetooth address; empty until discovered
    pub mac: String,
}

impl Default for DeskConfig {
    fn default() -> Self {
        DeskConfig {
            sit: 270.0,
            stand: 660.0,
            sit_duration: 45,
            stand_duration: 15,
            mac: String::new(),
        }
    }
}

fn check_height(value: f64) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        bail!("height must be a non-negative number of millimetres, got {}", value);
    }
    Ok(value)
}

/// Longest accepted phase, one week in minutes
pub const MAX_DURATION_MINUTES: u64 = 7 * 24 * 60;

fn check_duration(value: u64) -> Result<u64> {
    if value == 0 || value > MAX_DURATION_MINUTES {
        bail!(
            "duration must be between 1 and {} minutes, got {}",
            MAX_DURATION_MINUTES,
            value
        );
    }
    Ok(value)
}

impl DeskConfig {
    /// Replaces out-of-range values read from disk with the defaults
    fn sanitized(mut self) -> Self {
        let defaults = DeskConfig::default();
        if check_height(self.sit).is_err() {
            warn!("Ignoring invalid sit height {} from config", self.sit);
            self.sit = defaults.sit;
        }
        if check_height(self.stand).is_err() {
            warn!("Ignoring invalid stand height {} from config", self.stand);
            self.stand = defaults.stand;
        }
        if check_duration(self.sit_duration).is_err() {
            warn!("Ignoring invalid sit duration {} from config", self.sit_duration);
            self.sit_duration = defaults.sit_duration;
        }
        if check_duration(self.stand_duration).is_err() {
            warn!("Ignoring invalid stand duration {} from config", self.stand_duration);
            self.stand_duration = defaults.stand_duration;
        }
        self
    }
}

/// File-backed desk settings; every change is written straight back
pub struct ConfigStore {
    path: Option<PathBuf>,
    config: RwLock<DeskConfig>,
}

impl ConfigStore {
    /// Loads the config from a configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref().to_path_buf();

        let mut config = if file_path.exists() {
            let config_json = fs::read_to_string(&file_path).await?;
            let config: DeskConfig = serde_json::from_str(&config_json)?;
            info!("Config loaded from {:?}", file_path);
            config.sanitized()
        } else {
            warn!("Config file not found at {:?}, using default.", file_path);
            DeskConfig::default()
        };

        if let Ok(mac) = std::env::var(MAC_ENV_VAR) {
            if !mac.trim().is_empty() {
                info!("Using desk address from {}", MAC_ENV_VAR);
                config.mac = mac.trim().to_string();
            }
        }

        Ok(Self {
            path: Some(file_path),
            config: RwLock::new(config),
        })
    }

    /// A store that never touches the disk
    pub fn in_memory(config: DeskConfig) -> Self {
        Self {
            path: None,
            config: RwLock::new(config),
        }
    }

    pub async fn get(&self) -> DeskConfig {
        self.config.read().await.clone()
    }

    /// Applies `change` and persists the result
    pub async fn update<F>(&self, change: F) -> Result<DeskConfig>
    where
        F: FnOnce(&mut DeskConfig),
    {
        let updated = {
            let mut config = self.config.write().await;
            change(&mut config);
            config.clone()
        };
        self.persist().await?;
        Ok(updated)
    }

    pub async fn set_sit(&self, value: f64) -> Result<DeskConfig> {
        let value = check_height(value)?;
        self.update(|c| c.sit = value).await
    }

    pub async fn set_stand(&self, value: f64) -> Result<DeskConfig> {
        let value = check_height(value)?;
        self.update(|c| c.stand = value).await
    }

    pub async fn set_sit_duration(&self, minutes: u64) -> Result<DeskConfig> {
        let minutes = check_duration(minutes)?;
        self.update(|c| c.sit_duration = minutes).await
    }

    pub async fn set_stand_duration(&self, minutes: u64) -> Result<DeskConfig> {
        let minutes = check_duration(minutes)?;
        self.update(|c| c.stand_duration = minutes).await
    }

    pub async fn set_mac(&self, mac: &str) -> Result<DeskConfig> {
        let mac = mac.trim().to_string();
        self.update(|c| c.mac = mac).await
    }

    /// Saves the current config to its configuration file.
    pub async fn persist(&self) -> Result<()> {
        let Some(file_path) = self.path.as_ref() else {
            return Ok(());
        };
        if let Some(config_dir) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(config_dir).await {
                error!("Failed to create config directory {:?}: {}", config_dir, e);
                return Err(e.into());
            }
        }

        let config_json = match serde_json::to_string_pretty(&*self.config.read().await) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize desk config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;
        info!("Desk config saved to {:?}.", file_path);
        Ok(())
    }
}
