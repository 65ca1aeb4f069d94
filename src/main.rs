use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    resumidor::logging::init().context("init logging")?;

    let cli = resumidor::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        resumidor::cli::Command::Run(args) => {
            resumidor::run::run(args).await.context("run")?;
        }
        resumidor::cli::Command::Toc {
            command: resumidor::cli::TocCommand::Filter(args),
        } => {
            resumidor::toc::filter_preview(args).context("toc filter")?;
        }
    }

    Ok(())
}
