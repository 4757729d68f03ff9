//! Layered configuration surface.
//!
//! Loaded from an optional TOML file and overridden by CLI flags in
//! `acm-node`; every other crate just receives a fully-resolved
//! `AcmConfig` value (no crate reaches into the environment or the
//! filesystem on its own behalf).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BACKUP_DAILY_HOUR, DEFAULT_BACKUP_RETENTION_DAYS, DEFAULT_CRC_CACHE_TTL_SECS,
    DEFAULT_ROTATION_COMPLETED_RETENTION_SECS, DEFAULT_ROTATION_STATE_EXPIRY_SECS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertainDefault {
    Allowed,
    HimRequired,
    Blocked,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub default_on_uncertain: UncertainDefault,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            default_on_uncertain: UncertainDefault::HimRequired,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub state_expiry_secs: i64,
    pub completed_retention_secs: i64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            state_expiry_secs: DEFAULT_ROTATION_STATE_EXPIRY_SECS,
            completed_retention_secs: DEFAULT_ROTATION_COMPLETED_RETENTION_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AcvsConfig {
    pub enabled: bool,
    pub eula_version: String,
}

impl Default for AcvsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            eula_version: String::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub daily_hour: u32,
    pub retention_days: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            daily_hour: DEFAULT_BACKUP_DAILY_HOUR,
            retention_days: DEFAULT_BACKUP_RETENTION_DAYS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmConfig {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub crc_cache_ttl_secs: i64,
    pub validator: ValidatorConfig,
    pub rotation: RotationConfig,
    pub acvs: AcvsConfig,
    pub backup: BackupConfig,
}

impl Default for AcmConfig {
    fn default() -> Self {
        let home = dirs_home();
        Self {
            data_dir: home.join(".acm").join("data"),
            config_dir: home.join(".acm").join("config"),
            crc_cache_ttl_secs: DEFAULT_CRC_CACHE_TTL_SECS,
            validator: ValidatorConfig::default(),
            rotation: RotationConfig::default(),
            acvs: AcvsConfig::default(),
            backup: BackupConfig::default(),
        }
    }
}

impl AcmConfig {
    /// Loads a config from a TOML file, falling back to defaults for any
    /// field the file omits (`#[serde(default)]` on every nested struct).
    pub fn load_from_str(toml_src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_src)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.config_dir.join("keys")
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.keys_dir().join("evidence.priv")
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.keys_dir().join("evidence.pub")
    }
}

fn dirs_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
