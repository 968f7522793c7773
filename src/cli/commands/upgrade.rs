//! `walletvault upgrade`: rewrite both store files in the latest format.

use crate::cli::output;
use crate::cli::{session, Cli};
use crate::errors::Result;
use crate::vault::LATEST_VERSION;

/// Execute the `upgrade` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let session = session(cli)?;
    let mut model = session.open()?;

    let from = model.data_file_version;
    session.service.upgrade(&mut model)?;

    if from == LATEST_VERSION {
        output::success(&format!(
            "Wallet rewritten at v{LATEST_VERSION} ({} attachment(s))",
            model.attachments().count()
        ));
    } else {
        output::success(&format!(
            "Wallet upgraded from v{from} to v{LATEST_VERSION} ({} attachment(s))",
            model.attachments().count()
        ));
    }
    Ok(())
}
