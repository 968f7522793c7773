use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::{Argon2CryptoService, Argon2Params};
use crate::errors::{Result, WalletError};

/// Project-level configuration, loaded from `.walletvault.toml`.
///
/// Every field has a default so WalletVault works without any config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Wallet file used when `--vault` is not given.
    #[serde(default = "default_vault")]
    pub default_vault: String,

    /// Log filter handed to the logger (e.g. "warn", "walletvault=debug").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Argon2 memory cost in KiB (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_vault() -> String {
    "wallet.vault".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_vault: default_vault(),
            log_level: default_log_level(),
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the project root.
    const FILE_NAME: &'static str = ".walletvault.toml";

    /// Load settings from `<project_dir>/.walletvault.toml`.
    ///
    /// If the file does not exist, defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            WalletError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        settings
            .argon2_params()
            .to_argon2(None)
            .map_err(|e| WalletError::ConfigError(format!("{}: {e}", config_path.display())))?;

        Ok(settings)
    }

    /// Resolve the wallet file: an explicit path wins, otherwise
    /// `default_vault` relative to `project_dir`.
    pub fn vault_path(&self, project_dir: &Path, explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => project_dir.join(p),
            None => project_dir.join(&self.default_vault),
        }
    }

    /// Convert the Argon2 settings into crypto-layer params.
    pub fn argon2_params(&self) -> Argon2Params {
        Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }

    /// The crypto service new files are written with.
    pub fn crypto_service(&self) -> Argon2CryptoService {
        Argon2CryptoService::new(self.argon2_params())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
