use clap::Parser;
use redline::cli::{process::ProcessArgs, Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let code = match cli.command {
        Commands::Process {
            path,
            model,
            dry_run,
            safe,
            output,
            config,
        } => redline::cli::process::run(ProcessArgs {
            path,
            model,
            dry_run,
            safe,
            output,
            config,
            verbose: cli.verbose,
        }),
        Commands::Check => redline::cli::check::run(),
        Commands::Inspect { path } => redline::cli::inspect::run(&path, cli.verbose),
    };

    std::process::exit(code);
}
