//! flowcheck CLI: validate, run and retarget business-process tests.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "flowcheck",
    version,
    about = "Declarative business-process tests: validate, run, generate"
)]
struct Cli {
    #[command(subcommand)]
    command: flowcheck::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    flowcheck::cli::init_tracing(cli.command.verbose());
    if let Err(e) = flowcheck::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
