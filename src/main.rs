//! commodities-news binary entrypoint.
//! `once` runs a single ingestion pass, `schedule` runs the cron trigger,
//! `serve` exposes the read API (and the scheduler unless disabled).

use anyhow::Result;
use clap::{Parser, Subcommand};

use commodities_news::app::{init_tracing, App};
use commodities_news::config::Settings;

#[derive(Parser)]
#[command(name = "commodities-news", version, about = "Commodity news ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one ingestion pass and print the summary as JSON.
    Once,
    /// Run the cron scheduler until interrupted.
    Schedule,
    /// Serve the read API.
    Serve {
        /// Do not start the ingestion scheduler alongside the API.
        #[arg(long)]
        no_scheduler: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    init_tracing(&settings);

    let queue_webhooks = !matches!(cli.command, Command::Once);
    let app = App::build(settings, queue_webhooks).await?;
    match cli.command {
        Command::Once => {
            let summary = app.run_once().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Schedule => app.run_scheduler().await?,
        Command::Serve { no_scheduler } => app.serve(!no_scheduler).await?,
    }
    Ok(())
}
