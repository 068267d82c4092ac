use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use followup::config::{FollowupConfig, Secrets};
use followup::daemon::Daemon;
use followup::extract::{CommitmentExtractor, Extract};
use followup::llm::LlmClient;
use followup::store::{BridgeDb, DbHandle};
use followup::tracker::{Publish, TrackerClient, card_description};

#[derive(Parser)]
#[command(name = "followup")]
#[command(version, about = "Turn meeting transcripts into tracked action items")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: watch the cache, mature transcripts, publish cards
    Run,
    /// Extract action items from a single transcript file
    Process {
        /// Transcript file to process
        #[arg(short, long)]
        file: PathBuf,
        /// Print the extracted items without creating cards
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Create the database and a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("followup=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = cli.config.unwrap_or_else(FollowupConfig::default_path);
    let config = FollowupConfig::load_or_default(&config_path)?;
    let secrets = Secrets::from_env();

    match cli.command {
        Commands::Run => run_daemon(&config, &secrets).await,
        Commands::Process { file, dry_run } => process_file(&config, &secrets, &file, dry_run).await,
        Commands::Init => init(&config, &config_path),
    }
}

async fn run_daemon(config: &FollowupConfig, secrets: &Secrets) -> Result<()> {
    let (daemon, handle) = Daemon::new(config, secrets).await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            handle.shutdown();
        }
    });

    daemon.run().await
}

/// One-shot extraction for a transcript supplied on disk. Skips
/// maturation entirely: the file is treated as final.
async fn process_file(
    config: &FollowupConfig,
    secrets: &Secrets,
    file: &PathBuf,
    dry_run: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let title = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled Meeting".to_string());

    let extractor = CommitmentExtractor::new(LlmClient::new(&config.llm));
    let actions = extractor.extract(&title, &text).await?;

    if actions.is_empty() {
        println!("No action items found.");
        return Ok(());
    }

    if dry_run {
        println!("Would create {} card(s):", actions.len());
        for action in &actions {
            match &action.assignee {
                Some(who) => println!("- {} (assignee: {})", action.title, who),
                None => println!("- {}", action.title),
            }
        }
        return Ok(());
    }

    let (key, token, list_id) = secrets
        .tracker_credentials()
        .context("Tracker credentials not configured (FOLLOWUP_TRACKER_KEY / _TOKEN / _LIST_ID)")?;
    let tracker = TrackerClient::new(&config.tracker, key, token, list_id);

    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = DbHandle::new(BridgeDb::new(&config.database.path)?);

    let now = Utc::now();
    let title_for_insert = title.clone();
    let text_for_insert = text.clone();
    let transcript = db
        .call(move |db| db.insert_manual_transcript(&title_for_insert, &text_for_insert, now))
        .await?;

    let mut failures = 0usize;
    for action in actions {
        let transcript_id = transcript.id.clone();
        let item = db
            .call(move |db| db.create_action_item(&transcript_id, &action, Utc::now()))
            .await?;
        let desc = card_description(&item, &title, transcript.recorded_at);
        match tracker.publish(&item.title, &desc).await {
            Ok(card) => {
                println!("Created card: {}", card.url);
                db.call(move |db| db.mark_action_sent(&item.id, &card.id, &card.url))
                    .await?;
            }
            Err(err) => {
                failures += 1;
                eprintln!("Failed to create card for '{}': {}", item.title, err);
                let msg = err.to_string();
                db.call(move |db| db.mark_action_failed(&item.id, &msg)).await?;
            }
        }
    }

    let transcript_id = transcript.id;
    db.call(move |db| db.mark_transcript_processed(&transcript_id, Utc::now()))
        .await?;

    if failures > 0 {
        anyhow::bail!("{} card(s) could not be created", failures);
    }
    Ok(())
}

fn init(config: &FollowupConfig, config_path: &std::path::Path) -> Result<()> {
    if config_path.exists() {
        println!("Configuration already exists at {}", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        config.save(config_path)?;
        println!("Wrote default configuration to {}", config_path.display());
    }

    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    BridgeDb::new(&config.database.path)?;
    println!("Database ready at {}", config.database.path.display());
    println!();
    println!("Set FOLLOWUP_TRACKER_KEY, FOLLOWUP_TRACKER_TOKEN and FOLLOWUP_TRACKER_LIST_ID,");
    println!("then start the daemon with: followup run");
    Ok(())
}
