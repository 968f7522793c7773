//! `walletvault rotate-password`: re-key the wallet.
//!
//! Opens the wallet with the current credential, rewrites the main store
//! under the new one and moves every attachment over with fresh keys.

use crate::cli::output;
use crate::cli::{prompt_new_credential, session, Cli};
use crate::errors::Result;

/// Execute the `rotate-password` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let session = session(cli)?;

    // 1. Open the wallet with the current credential.
    output::info("Enter your current wallet credential.");
    let mut model = session.open()?;

    // 2. Prompt for the new credential.
    output::info("Choose your new wallet credential.");
    let new_credential = prompt_new_credential("WALLETVAULT_NEW")?;

    // 3. Re-key both store files.
    session.service.rotate_password(&mut model, &new_credential)?;

    output::success(&format!(
        "Password rotated for {} ({} item(s), {} attachment(s) re-encrypted)",
        session.path.display(),
        model.len(),
        model.attachments().count()
    ));
    Ok(())
}
