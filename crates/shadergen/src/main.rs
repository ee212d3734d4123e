mod cli;
mod response;
mod run;

use std::process::ExitCode;

use anyhow::Result;
use cli::Command;

fn main() -> Result<ExitCode> {
    let cli = cli::parse();
    run::initialise_tracing();

    let config = match run::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return Ok(ExitCode::from(2));
        }
    };
    match cli.command {
        Command::Check(args) => run::check(&config, &args),
        Command::Preview(args) => {
            run::preview(&config, args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
