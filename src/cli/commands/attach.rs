//! `walletvault attach` / `detach` / `extract`: manage an item's file.

use std::fs;
use std::path::Path;

use zeroize::Zeroize;

use crate::cli::output;
use crate::cli::{resolve_item, session, Cli};
use crate::errors::{Result, WalletError};

/// Execute the `attach` command.
pub fn execute_attach(cli: &Cli, item: &str, file: &Path) -> Result<()> {
    let content = fs::read(file)?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| WalletError::CommandFailed(format!("'{}' is not a file", file.display())))?;

    let session = session(cli)?;
    let mut model = session.open()?;
    let guid = resolve_item(&model, item)?;

    let size = content.len();
    model.attach(&guid, &file_name, content)?;
    session.service.save(&mut model)?;

    output::success(&format!("Attached '{file_name}' ({size} bytes) to {guid}"));
    Ok(())
}

/// Execute the `detach` command.
pub fn execute_detach(cli: &Cli, item: &str) -> Result<()> {
    let session = session(cli)?;
    let mut model = session.open()?;
    let guid = resolve_item(&model, item)?;

    let Some(file_name) = model
        .item(&guid)
        .and_then(|i| i.attachment.as_ref())
        .map(|a| a.file_name.clone())
    else {
        output::info("This item has no attachment.");
        return Ok(());
    };

    model.detach(&guid)?;
    session.service.save(&mut model)?;

    output::success(&format!("Removed attachment '{file_name}' from {guid}"));
    Ok(())
}

/// Execute the `extract` command.
pub fn execute_extract(cli: &Cli, item: &str, output_path: Option<&Path>) -> Result<()> {
    let session = session(cli)?;
    let model = session.open()?;
    let guid = resolve_item(&model, item)?;

    let file_name = model
        .item(&guid)
        .and_then(|i| i.attachment.as_ref())
        .map(|a| a.file_name.clone())
        .ok_or_else(|| WalletError::CommandFailed("this item has no attachment".into()))?;

    let mut content = session
        .service
        .attachments()
        .read_content(&session.path, &guid, model.require_encryptor()?)?
        .ok_or_else(|| WalletError::ItemNotFound(format!("attachment {guid}")))?;

    let target = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| Path::new(&file_name).to_path_buf());
    if target.exists() {
        content.zeroize();
        return Err(WalletError::CommandFailed(format!(
            "{} already exists",
            target.display()
        )));
    }
    let written = fs::write(&target, &content);
    content.zeroize();
    written?;

    output::success(&format!("Wrote '{file_name}' to {}", target.display()));
    Ok(())
}
