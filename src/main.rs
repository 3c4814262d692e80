//! # LeadFlow — Campaign Automation Daemon
//!
//! Runs the hourly campaign scheduler tick against the CRM database, and
//! exposes the on-demand paths (manual activation, single-address test send).
//!
//! Usage:
//!   leadflow run                                  # Start the tick loop
//!   leadflow create <definition.json>             # Save a new campaign
//!   leadflow activate <campaign-id>               # Fire one campaign now
//!   leadflow test-send <campaign-id> <address>    # Preview to one inbox

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use leadflow_core::{EngineConfig, SystemClock};
use leadflow_engine::campaign::Campaign;
use leadflow_engine::dispatch::SmtpMailer;
use leadflow_engine::notify::NotifyRouter;
use leadflow_engine::persistence::CampaignStore;
use leadflow_engine::scheduler::{CampaignScheduler, spawn_tick_loop};

#[derive(Parser)]
#[command(name = "leadflow", version, about = "📬 LeadFlow — campaign automation daemon")]
struct Cli {
    /// Path to the engine config TOML
    #[arg(long, default_value = "leadflow.toml")]
    config: PathBuf,

    /// Path to the CRM database
    #[arg(long, default_value = "leadflow.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the periodic scheduler tick
    Run,
    /// Save a campaign from a JSON definition file and notify the
    /// configured roles
    Create { definition: PathBuf },
    /// Manually activate one campaign (same send logic as the tick)
    Activate { campaign_id: Uuid },
    /// Send one campaign's content to a single address
    TestSend { campaign_id: Uuid, address: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load_from(&cli.config)?;
    let store = Arc::new(CampaignStore::open(&cli.db)?);
    let mailer = Arc::new(SmtpMailer::new(config.smtp.clone()));
    let tick_interval = config.tick_interval_secs;
    let notify = config.notify.clone();
    let scheduler = Arc::new(CampaignScheduler::new(
        store.clone(),
        mailer,
        Arc::new(SystemClock),
        config,
    ));

    match cli.command {
        Command::Run => {
            spawn_tick_loop(scheduler, tick_interval).await;
        }
        Command::Create { definition } => {
            let raw = std::fs::read_to_string(&definition)?;
            let campaign: Campaign = serde_json::from_str(&raw)?;
            store.save_campaign(&campaign)?;
            let mut router = NotifyRouter::from_config(&notify);
            router.campaign_created(&campaign.name, &notify.roles).await;
            tracing::info!("✅ Campaign '{}' created ({})", campaign.name, campaign.id);
        }
        Command::Activate { campaign_id } => {
            let sent = scheduler.activate(campaign_id).await?;
            tracing::info!("✅ Campaign activated, {sent} recipient(s)");
        }
        Command::TestSend { campaign_id, address } => {
            scheduler.test_send(campaign_id, &address).await?;
            tracing::info!("✅ Test send delivered to {address}");
        }
    }

    Ok(())
}
