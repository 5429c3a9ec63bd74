use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use veille_adapters::default_adapters;
use veille_pipeline::{report, WatchConfig, WatchPipeline};
use veille_scoring::{GeminiProvider, ScoringGateway};
use veille_store::JobStore;

#[derive(Debug, Parser)]
#[command(name = "veille")]
#[command(about = "Multi-source job watch with LLM scoring")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, dedup, score and persist new postings, then render the report.
    Run,
    /// Re-render the report from the existing store without fetching anything.
    Report,
    /// Force a fresh analysis for one stored record, replacing its current one.
    Rescore { id: String },
}

fn build_pipeline(config: WatchConfig) -> Result<WatchPipeline> {
    let api_key = std::env::var("GEMINI_API_KEY")
        .context("GEMINI_API_KEY must be set to score postings")?;
    let provider = GeminiProvider::with_model(config.model.clone(), api_key)
        .context("building scoring provider")?;
    let gateway = ScoringGateway::new(
        Box::new(provider),
        config.profile.clone(),
        config.scoring_pause(),
    );
    let adapters = default_adapters(config.politeness_delay());
    WatchPipeline::new(config, adapters, gateway)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = WatchConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let pipeline = build_pipeline(config)?;
            let summary = pipeline.run_once().await?;
            println!(
                "run complete: run_id={} fetched={} unique={} known={} scored={} failures={} total={}",
                summary.run_id,
                summary.fetched_drafts,
                summary.unique_drafts,
                summary.already_known,
                summary.scored,
                summary.scoring_failures,
                summary.total_records,
            );
        }
        Commands::Report => {
            // No scoring involved, so no API key required here.
            let map = JobStore::new(&config.store_path).load().await?;
            report::render_to_file(&config.report_path, &map, Utc::now()).await?;
            println!(
                "report rendered: {} records -> {}",
                map.len(),
                config.report_path.display()
            );
        }
        Commands::Rescore { id } => {
            let pipeline = build_pipeline(config)?;
            let analysis = pipeline.rescore(&id).await?;
            println!("rescored {id}: {}/10 - {}", analysis.score, analysis.verdict);
        }
    }

    Ok(())
}
