use clap::Parser;
use walletvault::cli::commands;
use walletvault::cli::{Cli, Commands};
use walletvault::config::Settings;

fn main() {
    let cli = Cli::parse();

    // The logger handle must outlive the command.
    let _logger = match start_logging(&cli) {
        Ok(handle) => handle,
        Err(e) => {
            walletvault::cli::output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Init => commands::init::execute(&cli),
        Commands::List => commands::list::execute(&cli),
        Commands::AddCategory {
            ref name,
            ref parent,
        } => commands::add::execute_category(&cli, name, parent.as_deref()),
        Commands::AddEntry {
            ref parent,
            ref name,
            ref fields,
            ref notes,
        } => commands::add::execute_entry(&cli, parent, name, fields, notes.as_deref()),
        Commands::Attach { ref item, ref file } => {
            commands::attach::execute_attach(&cli, item, file)
        }
        Commands::Detach { ref item } => commands::attach::execute_detach(&cli, item),
        Commands::Extract {
            ref item,
            ref output,
        } => commands::attach::execute_extract(&cli, item, output.as_deref()),
        Commands::Upgrade => commands::upgrade::execute(&cli),
        Commands::RotatePassword => commands::rotate::execute(&cli),
        Commands::Export {
            ref item,
            ref target,
        } => commands::export::execute(&cli, item, target),
        Commands::Recover => commands::recover::execute(&cli),
    };

    if let Err(e) = result {
        walletvault::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}

fn start_logging(cli: &Cli) -> walletvault::errors::Result<flexi_logger::LoggerHandle> {
    let level = match &cli.log_level {
        Some(level) => level.clone(),
        None => Settings::load(&std::env::current_dir()?)?.log_level,
    };
    walletvault::logging::init_logging(&level)
}
