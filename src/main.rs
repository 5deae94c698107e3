mod archive;
mod cli;
mod client;
mod config;
mod error;
mod format;
mod handlers;
mod models;

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;

use crate::cli::Cli;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(c) => c,
        Err(e) => {
            e.print().ok();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(cli.verbose);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = cli::run(cli, &mut out);
    out.flush().ok();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::debug!("command failed: {e:?}");
            error::report(&e, &mut std::io::stderr().lock()).ok();
            ExitCode::FAILURE
        }
    }
}
