//! Subcommand implementations.

mod invoke;
mod log;
mod serve;
mod validate;

use crate::config::Command;

/// Runs the selected subcommand.
pub async fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Serve(args) => serve::run(args).await,
        Command::Invoke(args) => invoke::run(args).await,
        Command::Validate(args) => validate::run(args).await,
        Command::Log(args) => log::run(args).await,
    }
}
