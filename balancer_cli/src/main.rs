mod cli;
mod commands;
mod display;
mod error_fmt;
mod hw;
mod logging;
mod mailer;

use clap::Parser;

use crate::cli::{Cli, Commands, JSON_MODE};
use crate::error_fmt::{CliError, exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    // Pretty reports for anything that escapes the humanizer below.
    let _ = color_eyre::install();

    if let Err(e) = real_main(cli) {
        let json = JSON_MODE.get().copied().unwrap_or(false);
        if json {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("error: {}", humanize(&e));
        }
        tracing::debug!(error = ?e, "exiting with error");
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = match balancer_config::load_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            logging::init_tracing(cli.json, &cli.log_level, None);
            return Err(CliError::Config(e.to_string()).into());
        }
    };
    logging::init_tracing(cli.json, &cli.log_level, Some(&cfg.logging));
    tracing::info!(config = %cli.config.display(), cells = cfg.general.number_of_batteries, "configuration loaded");

    match cli.cmd {
        Commands::Run { cycles, no_display } => commands::run(&cfg, cycles, no_display, cli.json),
        Commands::SelfCheck { balance_test } => commands::self_check(&cfg, balance_test, cli.json),
        Commands::Sample => commands::sample(&cfg, cli.json),
    }
}
