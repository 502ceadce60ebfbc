//! `cfde`: package, validate, and submit datasets to the CFDE ingest pipeline.
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod bag;
mod cli;
mod error;
mod flows;
mod http;
mod remote;
mod resolve;
mod schema;
mod settings;
mod state;
mod status;
mod templates;
mod transfer;
mod util;
mod validate;
mod vcs;
mod workflow;

use cli::{Command, RootArgs};
use error::find_submit_error;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.command.verbose());

    let (result, prefix) = match &args.command {
        Command::Run(run) => (workflow::run_run(run), "Error while starting Flow"),
        Command::Status(status) => (workflow::run_status(status), "Error checking status"),
        Command::Check(check) => (workflow::run_check(check), "Error checking client"),
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            match find_submit_error(&err) {
                Some(named) => eprintln!("{named}"),
                None => eprintln!("{prefix}: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr; `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}
