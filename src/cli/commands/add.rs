//! `walletvault add-category` / `add-entry`: grow the item tree.

use crate::cli::output;
use crate::cli::{parse_field, resolve_item, session, Cli};
use crate::errors::{Result, WalletError};

/// Execute the `add-category` command.
pub fn execute_category(cli: &Cli, name: &str, parent: Option<&str>) -> Result<()> {
    let session = session(cli)?;
    let mut model = session.open()?;

    let parent = match parent {
        Some(query) => {
            let guid = resolve_item(&model, query)?;
            require_category(&model, &guid, query)?;
            Some(guid)
        }
        None => None,
    };

    let guid = model.add_category(name, parent)?;
    session.service.save(&mut model)?;

    output::success(&format!("Added category '{name}' ({guid})"));
    Ok(())
}

/// Execute the `add-entry` command.
pub fn execute_entry(
    cli: &Cli,
    parent: &str,
    name: &str,
    fields: &[String],
    notes: Option<&str>,
) -> Result<()> {
    // Validate fields before prompting for anything.
    let fields = fields
        .iter()
        .map(|f| parse_field(f))
        .collect::<Result<Vec<_>>>()?;

    let session = session(cli)?;
    let mut model = session.open()?;

    let parent_guid = resolve_item(&model, parent)?;
    require_category(&model, &parent_guid, parent)?;

    let guid = model.add_entry(parent_guid, name)?;
    if let Some(item) = model.item_mut(&guid) {
        item.fields.extend(fields);
        item.notes = notes.map(str::to_string);
    }
    session.service.save(&mut model)?;

    output::success(&format!("Added entry '{name}' ({guid})"));
    Ok(())
}

fn require_category(
    model: &crate::vault::WalletModel,
    guid: &uuid::Uuid,
    query: &str,
) -> Result<()> {
    match model.item(guid) {
        Some(item) if item.is_category() => Ok(()),
        _ => Err(WalletError::CommandFailed(format!(
            "'{query}' is not a category"
        ))),
    }
}
