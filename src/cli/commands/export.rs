//! `walletvault export`: copy one entry into a new, separately keyed wallet.

use std::path::Path;

use crate::cli::output;
use crate::cli::{prompt_new_credential, resolve_item, session, Cli};
use crate::errors::Result;

/// Execute the `export` command.
pub fn execute(cli: &Cli, item: &str, target: &Path) -> Result<()> {
    let session = session(cli)?;
    let model = session.open()?;
    let guid = resolve_item(&model, item)?;

    // The exported wallet gets its own credential.
    output::info("Choose a credential for the exported wallet.");
    let credential = prompt_new_credential("WALLETVAULT_EXPORT")?;

    let target = session.settings.vault_path(&std::env::current_dir()?, Some(target));
    session
        .service
        .export_item(&model, &guid, &credential, &target)?;

    output::tip(&format!(
        "Open it with `walletvault --vault {} list`.",
        target.display()
    ));
    Ok(())
}
