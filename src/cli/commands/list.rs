//! `walletvault list`: display the item tree in a table.

use crate::cli::output;
use crate::cli::{session, Cli};
use crate::errors::Result;

/// Execute the `list` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let session = session(cli)?;
    let model = session.open()?;

    let attachments = model.attachments().count();
    output::info(&format!(
        "{} (v{}): {} item(s), {} attachment(s)",
        session.path.display(),
        model.data_file_version,
        model.len(),
        attachments
    ));
    if !model.is_latest_version() {
        output::tip("Run `walletvault upgrade` to rewrite this wallet in the latest format.");
    }

    output::print_items_table(&model);

    Ok(())
}
