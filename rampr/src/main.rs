mod check;
mod cli;
mod exit_codes;
mod harness;
mod http;
mod logging;
mod output;
mod run;
mod run_error;
mod shape_file;
mod target;

use clap::Parser;
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let cli = match cli::Cli::try_parse() {
        Ok(v) => v,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    exit_codes::ExitCode::Success.as_i32()
                }
                _ => exit_codes::ExitCode::InvalidInput.as_i32(),
            };
            std::process::exit(code);
        }
    };

    // The progress bar owns the terminal in human mode; keep logs to warnings unless asked.
    let default_filter = match &cli.command {
        cli::Command::Run(args) if args.output == cli::OutputFormat::HumanReadable => "rampr=warn",
        _ => "rampr=info",
    };
    logging::init(cli.log_level.as_deref(), default_filter);

    let result = match cli.command {
        cli::Command::Run(args) => run::run(args).await,
        cli::Command::Check(args) => check::check(args).await,
        cli::Command::Presets => Ok(check::presets()),
    };

    let code = match result {
        Ok(code) => code.as_i32(),
        Err(err) => {
            eprintln!("{err}");
            err.exit_code().as_i32()
        }
    };

    std::process::exit(code);
}
