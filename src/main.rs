use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use news_geocoder::cli::{Cli, Commands};
use news_geocoder::commands;
use news_geocoder::config::AppConfig;
use news_geocoder::App;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = App::initialize(AppConfig::from_env()).context("failed to initialize")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!(
                target: "app",
                health = %serde_json::to_string(&app.health())?,
                "starting backlog worker"
            );
            tokio::select! {
                _ = commands::run_worker(&app) => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for shutdown signal")?;
                    info!(target: "app", "shutdown requested");
                }
            }
        }
        Commands::Resolve(args) => {
            let report =
                commands::resolve(&app, &args.title, &args.text, !args.no_geocode).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Requeue(args) => {
            let cleared = commands::requeue(&app, args.id)?;
            println!("requeued {cleared} article(s)");
        }
    }

    Ok(())
}
