//! `walletvault init`: create a new, empty wallet.

use std::fs;

use crate::cli::output;
use crate::cli::{prompt_new_credential, session, Cli};
use crate::errors::{Result, WalletError};

/// Execute the `init` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let session = session(cli)?;
    let path = &session.path;

    // 1. Refuse to overwrite an existing wallet.
    if path.exists() {
        output::tip("Use `walletvault add-category` to add items to the existing wallet.");
        return Err(WalletError::VaultAlreadyExists(path.clone()));
    }

    // 2. Create the parent directory if it doesn't exist.
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty() && !d.exists()) {
        fs::create_dir_all(dir)?;
        output::info(&format!("Created directory: {}", dir.display()));
    }

    // 3. Prompt for the new credential and write the empty wallet.
    let credential = prompt_new_credential("WALLETVAULT")?;
    session.service.create(path, &credential)?;
    output::success(&format!("Wallet created at {}", path.display()));

    output::tip("Run `walletvault add-category <NAME>` to add a category.");
    output::tip("Run `walletvault list` to see the item tree.");

    Ok(())
}
