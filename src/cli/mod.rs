//! CLI module: Clap argument parser, output helpers, and command implementations.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::Parser;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::Settings;
use crate::crypto::Credential;
use crate::errors::{Result, WalletError};
use crate::vault::{WalletModel, WalletService};

/// Minimum password length to prevent trivially weak passwords.
const MIN_PASSWORD_LEN: usize = 8;

/// WalletVault CLI: encrypted password wallet with file attachments.
#[derive(Parser)]
#[command(
    name = "walletvault",
    about = "Encrypted password wallet with file attachments",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Wallet file (default: `default_vault` from .walletvault.toml)
    #[arg(long, global = true, env = "WALLETVAULT_PATH")]
    pub vault: Option<PathBuf>,

    /// Log level filter (default: `log_level` from .walletvault.toml)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a new, empty wallet
    Init,

    /// Show the item tree
    List,

    /// Add a category
    AddCategory {
        /// Category name
        name: String,
        /// Parent category (GUID, GUID prefix or name)
        #[arg(long)]
        parent: Option<String>,
    },

    /// Add an entry under a category
    AddEntry {
        /// Parent category (GUID, GUID prefix or name)
        parent: String,
        /// Entry name
        name: String,
        /// Credential field, repeatable (e.g. -f user=alice)
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Attach a file to an item (replaces an existing attachment)
    Attach {
        /// Item (GUID, GUID prefix or name)
        item: String,
        /// File to attach
        file: PathBuf,
    },

    /// Remove the attachment of an item
    Detach {
        /// Item (GUID, GUID prefix or name)
        item: String,
    },

    /// Write the decrypted attachment of an item to a file
    Extract {
        /// Item (GUID, GUID prefix or name)
        item: String,
        /// Output path (default: the attachment's file name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rewrite the wallet in the latest file format
    Upgrade,

    /// Change the wallet password and combination
    RotatePassword,

    /// Export one entry (and its category) into a new wallet
    Export {
        /// Entry (GUID, GUID prefix or name)
        item: String,
        /// Path of the new wallet file
        target: PathBuf,
    },

    /// Finish an interrupted attachment update
    Recover,
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Everything a command needs: settings, the wired service and the
/// resolved wallet path.
pub struct Session {
    pub settings: Settings,
    pub service: WalletService,
    pub path: PathBuf,
}

impl Session {
    /// Open the session's wallet, prompting for its credential.
    pub fn open(&self) -> Result<WalletModel> {
        let credential = prompt_credential()?;
        self.service.open(&self.path, &credential)
    }
}

/// Load settings from the working directory and wire up the service.
pub fn session(cli: &Cli) -> Result<Session> {
    let cwd = std::env::current_dir()?;
    let settings = Settings::load(&cwd)?;
    let path = settings.vault_path(&cwd, cli.vault.as_deref());
    let service = WalletService::new(
        Box::new(settings.crypto_service()),
        Some(Box::new(output::ConsoleNotifier)),
    );
    Ok(Session {
        settings,
        service,
        path,
    })
}

/// Get the wallet credential, trying in order:
/// 1. `WALLETVAULT_PASSWORD` / `WALLETVAULT_COMBINATION` env vars (CI/CD)
/// 2. Interactive prompt
pub fn prompt_credential() -> Result<Credential> {
    let password = secret_from_env("WALLETVAULT_PASSWORD")
        .map(Ok)
        .unwrap_or_else(|| prompt_secret("Enter wallet password"))?;
    let combination = secret_from_env("WALLETVAULT_COMBINATION")
        .map(Ok)
        .unwrap_or_else(|| prompt_secret("Enter combination"))?;
    Ok(Credential::new(password.as_str(), combination.as_str()))
}

/// Prompt for a new credential with confirmation.
///
/// `env_prefix` names the env vars consulted first
/// (`<prefix>_PASSWORD`, `<prefix>_COMBINATION`).  Enforces a minimum
/// password length and a non-empty combination.
pub fn prompt_new_credential(env_prefix: &str) -> Result<Credential> {
    let password = match secret_from_env(&format!("{env_prefix}_PASSWORD")) {
        Some(pw) if pw.len() < MIN_PASSWORD_LEN => {
            return Err(WalletError::CommandFailed(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Some(pw) => pw,
        None => loop {
            let pw = prompt_confirmed("Choose wallet password")?;
            if pw.len() < MIN_PASSWORD_LEN {
                output::warning(&format!(
                    "Password must be at least {MIN_PASSWORD_LEN} characters. Try again."
                ));
                continue;
            }
            break pw;
        },
    };

    let combination = match secret_from_env(&format!("{env_prefix}_COMBINATION")) {
        Some(c) => c,
        None => prompt_confirmed("Choose combination")?,
    };
    if combination.is_empty() {
        return Err(WalletError::CommandFailed(
            "combination cannot be empty".into(),
        ));
    }

    Ok(Credential::new(password.as_str(), combination.as_str()))
}

fn secret_from_env(name: &str) -> Option<Zeroizing<String>> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .map(Zeroizing::new)
}

fn prompt_secret(prompt: &str) -> Result<Zeroizing<String>> {
    dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .map(Zeroizing::new)
        .map_err(prompt_error)
}

fn prompt_confirmed(prompt: &str) -> Result<Zeroizing<String>> {
    dialoguer::Password::new()
        .with_prompt(prompt)
        .with_confirmation(
            format!("Confirm {}", prompt.to_lowercase()),
            "Values do not match, try again",
        )
        .interact()
        .map(Zeroizing::new)
        .map_err(prompt_error)
}

fn prompt_error(e: dialoguer::Error) -> WalletError {
    match e {
        dialoguer::Error::IO(io) if io.kind() == std::io::ErrorKind::Interrupted => {
            WalletError::UserCancelled
        }
        e => WalletError::CommandFailed(format!("password prompt: {e}")),
    }
}

/// Find an item by full GUID, unique GUID prefix, or unique name.
pub fn resolve_item(model: &WalletModel, query: &str) -> Result<Uuid> {
    if let Ok(guid) = Uuid::parse_str(query) {
        return model
            .item(&guid)
            .map(|i| i.guid)
            .ok_or_else(|| WalletError::ItemNotFound(query.to_string()));
    }

    let by_prefix: Vec<Uuid> = model
        .items()
        .iter()
        .filter(|i| i.guid.to_string().starts_with(&query.to_lowercase()))
        .map(|i| i.guid)
        .collect();
    let candidates = if by_prefix.is_empty() {
        model
            .items()
            .iter()
            .filter(|i| i.name == query)
            .map(|i| i.guid)
            .collect()
    } else {
        by_prefix
    };

    match candidates.as_slice() {
        [guid] => Ok(*guid),
        [] => Err(WalletError::ItemNotFound(query.to_string())),
        _ => Err(WalletError::CommandFailed(format!(
            "'{query}' matches {} items; use a longer GUID prefix",
            candidates.len()
        ))),
    }
}

/// Split a `KEY=VALUE` field argument.
pub fn parse_field(arg: &str) -> Result<(String, String)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(WalletError::CommandFailed(format!(
            "invalid field '{arg}', expected KEY=VALUE"
        ))),
    }
}
