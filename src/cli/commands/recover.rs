//! `walletvault recover`: finish an interrupted attachment update.

use crate::cli::output;
use crate::cli::{prompt_credential, session, Cli};
use crate::errors::Result;
use crate::vault::Recovery;

/// Execute the `recover` command.
///
/// The credential decides which attachment store survives when a staged
/// copy sits next to the committed one.
pub fn execute(cli: &Cli) -> Result<()> {
    let session = session(cli)?;
    let credential = prompt_credential()?;

    match session.service.recover(&session.path, &credential)? {
        Recovery::Clean => output::info("Nothing to recover."),
        Recovery::CompletedRename => {
            output::success("Completed an interrupted attachment update.")
        }
        Recovery::DiscardedStale => {
            output::success("Removed a stale staged attachment file.")
        }
        Recovery::PromotedStaged => {
            output::success("Completed an interrupted password change.")
        }
    }
    Ok(())
}
