//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::notify::Notifier;
use crate::vault::{AccessFlag, Item, WalletModel};

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

/// Routes service notifications to the styled helpers above.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify_error(&self, title: &str, message: &str) {
        error(&format!("{title}: {message}"));
    }

    fn notify_warn(&self, title: &str, message: &str) {
        warning(&format!("{title}: {message}"));
    }

    fn notify_info(&self, title: &str, message: &str) {
        info(&format!("{title}: {message}"));
    }
}

/// Print the item tree (Name, Type, GUID, Fields, Attachment).
pub fn print_items_table(model: &WalletModel) {
    if model.is_empty() {
        info("This wallet is empty.");
        tip("Run `walletvault add-category <NAME>` to add your first category.");
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Name", "Type", "GUID", "Fields", "Attachment"]);

    let mut stack: Vec<(&Item, usize)> = model.roots().map(|i| (i, 0)).collect();
    stack.reverse();
    while let Some((item, depth)) = stack.pop() {
        table.add_row(vec![
            format!("{}{}", "  ".repeat(depth), item.name),
            if item.is_category() { "category" } else { "entry" }.to_string(),
            item.guid.to_string()[..8].to_string(),
            item.fields.keys().cloned().collect::<Vec<_>>().join(", "),
            attachment_cell(item),
        ]);
        for child in model.children_of(&item.guid).into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }

    println!("{table}");
}

fn attachment_cell(item: &Item) -> String {
    match &item.attachment {
        None => String::new(),
        Some(a) => match a.access_flag {
            AccessFlag::None => a.file_name.clone(),
            AccessFlag::Create => format!("{} (new)", a.file_name),
            AccessFlag::Update => format!("{} (changed)", a.file_name),
            AccessFlag::Delete => format!("{} (deleted)", a.file_name),
        },
    }
}
