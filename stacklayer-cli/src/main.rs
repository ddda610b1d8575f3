//! StackLayer CLI - Command-line interface
//!
//! This binary provides a command-line interface to the StackLayer library.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::demo::DemoArgs;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "stacklayer")]
#[command(version = stacklayer::VERSION)]
#[command(about = "Asynchronous provisioning of cloud resources", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Run an end-to-end provisioning scenario against a simulated cloud
    Demo {
        /// Make backend creation of the named volume fail (e.g. web-data)
        #[arg(long, value_name = "NAME")]
        fail_volume: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config { command } => commands::config::run(command),
        Commands::Demo { fail_volume } => CliRunner::with_debug(cli.debug)
            .and_then(|runner| commands::demo::run(&runner, DemoArgs { fail_volume })),
    };

    if let Err(e) = result {
        e.exit();
    }
}
