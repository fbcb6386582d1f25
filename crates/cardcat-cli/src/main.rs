use anyhow::{bail, Result};
use cardcat_core::SourceId;
use cardcat_sync::{RefreshConfig, RefreshPipeline};
use cardcat_web::{AppState, DEFAULT_ADDR};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cardcat")]
#[command(about = "Scrape, consolidate, and serve the credit card catalog")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape every enabled source and rewrite the card dataset.
    Refresh {
        /// Only scrape these sources (nerdwallet, thepointsguy, bankrate).
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Override the dataset size cap.
        #[arg(long)]
        max_cards: Option<usize>,
    },
    /// Serve the catalog and the refresh endpoint over HTTP.
    Serve {
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: String,
    },
    /// Print the top cards of the current dataset.
    Show {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn parse_sources(raw: &[String]) -> Result<Vec<SourceId>> {
    raw.iter()
        .map(|name| match SourceId::parse(name) {
            Some(source) => Ok(source),
            None => bail!("unknown source {name:?}; expected nerdwallet, thepointsguy, or bankrate"),
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = RefreshConfig::from_env();

    match cli.command.unwrap_or(Commands::Refresh {
        sources: Vec::new(),
        max_cards: None,
    }) {
        Commands::Refresh { sources, max_cards } => {
            if let Some(max_cards) = max_cards {
                config.max_cards = max_cards;
            }
            let pipeline = RefreshPipeline::new(config)?.with_sources(parse_sources(&sources)?);
            let summary = pipeline.run_once().await?;
            println!(
                "refresh complete: run_id={} scraped={} cards={} dataset={}",
                summary.run_id,
                summary.total_scraped,
                summary.final_count,
                summary.dataset_path.display()
            );
            if let Some(backup) = &summary.backup_path {
                println!("previous dataset archived to {}", backup.display());
            }
            if !summary.failed_sources.is_empty() {
                let failed = summary
                    .failed_sources
                    .iter()
                    .map(SourceId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("sources with no results: {failed}");
            }
            println!("report: {}", summary.report_path.display());
        }
        Commands::Serve { addr } => {
            let pipeline = RefreshPipeline::new(config)?;
            cardcat_web::serve(&addr, AppState::load(pipeline).await).await?;
        }
        Commands::Show { limit } => {
            let cards = config.dataset_store().load().await?;
            for (position, card) in cards.iter().take(limit).enumerate() {
                println!(
                    "{:>3}. {} ({}) ${} annual fee, top rate {}x",
                    position + 1,
                    card.name,
                    card.network,
                    card.annual_fee,
                    cardcat_core::max_reward_rate(&card.reward_rates)
                );
            }
        }
    }

    Ok(())
}
