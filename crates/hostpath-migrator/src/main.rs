mod commands;
mod error;
mod logging;
mod settings;
mod shutdown;

use std::process::ExitCode;

use clap::Parser;

use crate::commands::Commands;
use crate::error::CliError;
use crate::settings::GlobalArgs;

#[derive(Parser)]
#[command(name = "hostpath-migrator")]
#[command(version)]
#[command(about = "Migrate hostPath persistent volumes to CSI volumes", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.global.log_level.as_deref(), cli.global.log_format) {
        print_error(&e);
        return ExitCode::FAILURE;
    }

    match cli.command.execute(&cli.global) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn print_error(error: &CliError) {
    eprintln!("error: {error}");

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("caused by: {cause}");
        source = std::error::Error::source(cause);
    }
}
