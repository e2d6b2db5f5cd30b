use std::process::ExitCode;

use clap::Parser;

use pyplot::{DispatchError, GlobalArgs};
use pyplot::config_file::Settings;
use pyplot::dispatch::BIN_NAME;

/// Global options, read before the command tree exists.
///
/// Everything from the first script or group name on is parsed against the tree,
/// which also handles `--help` and `--version`.
#[derive(Parser, Debug)]
#[command(name = "pyplot", disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_file = cli.global.log_file.as_ref().map(std::fs::File::create).transpose()?;
    pyplot::logger::init(cli.global.verbose, log_file);

    let config_path = match cli.global.config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let argv: Vec<String> = std::iter::once(BIN_NAME.to_string())
        .chain(cli.command)
        .collect();

    match pyplot::dispatch(&argv, &config_path) {
        // Help, version and usage errors
        Err(DispatchError::Usage(e)) => {
            e.print()?;
            Ok(ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(2)))
        }
        result => Ok(result?),
    }
}
