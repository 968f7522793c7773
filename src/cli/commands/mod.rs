//! One module per `walletvault` subcommand.

pub mod add;
pub mod attach;
pub mod export;
pub mod init;
pub mod list;
pub mod recover;
pub mod rotate;
pub mod upgrade;
