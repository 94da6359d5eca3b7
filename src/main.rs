use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;

use freightlink::{
    config, db, logging,
    services::{mpesa::CallbackDisposition, notifications::LoggingDispatcher, Services},
};

#[derive(Parser)]
#[command(name = "freightlink", about = "FreightLink marketplace maintenance tasks", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Store an M-Pesa STK callback body read from a file and settle its payment
    IngestCallback {
        /// Path to the raw JSON body
        file: PathBuf,
    },
    /// Expire pending matches whose route has departed or closed
    ExpireMatches,
    /// Issue an API key and print it once
    IssueApiKey {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        name: String,
    },
    /// Deliver unsent notifications through the log dispatcher
    DispatchNotifications,
    /// Replay a booking's audit trail through the state machine
    VerifyBooking {
        #[arg(long)]
        booking: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    logging::init_tracing(&cfg.log_level, cfg.log_json);

    let pool = db::establish_connection_with_config(&db::DbConfig::from(&cfg))
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate || matches!(cli.command, Commands::Migrate) {
        db::run_migrations(&pool).await.context("migrations failed")?;
    }

    let services = Services::new(Arc::new(pool), &cfg);
    run(&services, cli.command, cli.json).await
}

async fn run(services: &Services, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Migrate => println!("Migrations applied"),
        Commands::IngestCallback { file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let outcome = services.mpesa.ingest_callback(&raw).await?;
            if json {
                print_json(&outcome.callback)?;
            } else {
                let summary = match &outcome.disposition {
                    CallbackDisposition::Completed(p) => format!("payment {} completed", p.id),
                    CallbackDisposition::Failed(p) => format!("payment {} failed", p.id),
                    CallbackDisposition::AlreadySettled(p) => {
                        format!("payment {} already settled; left untouched", p.id)
                    }
                    CallbackDisposition::Unmatched => "no matching payment".to_string(),
                    CallbackDisposition::Duplicate => "duplicate callback ignored".to_string(),
                    CallbackDisposition::Malformed => "unparseable payload stored".to_string(),
                };
                println!("Callback {}: {}", outcome.callback.id, summary);
            }
        }
        Commands::ExpireMatches => {
            let expired = services.matching.expire_stale_matches(Utc::now()).await?;
            println!("Expired {} stale match(es)", expired);
        }
        Commands::IssueApiKey { user, name } => {
            let issued = services.api_keys.issue_key(user, &name).await?;
            if json {
                #[derive(Serialize)]
                struct Issued<'a> {
                    id: i64,
                    key: &'a str,
                    expires_at: Option<chrono::DateTime<Utc>>,
                }
                print_json(&Issued {
                    id: issued.record.id,
                    key: &issued.key,
                    expires_at: issued.record.expires_at,
                })?;
            } else {
                println!("API key {} for user {}:", issued.record.id, user);
                println!("{}", issued.key);
                println!("Store it now; it cannot be shown again.");
            }
        }
        Commands::DispatchNotifications => {
            let report = services
                .notifications
                .dispatch_pending(&LoggingDispatcher)
                .await?;
            println!(
                "Examined {}, sent {} email(s) and {} SMS, {} failure(s)",
                report.examined, report.emails_sent, report.sms_sent, report.failures
            );
        }
        Commands::VerifyBooking { booking } => {
            services.bookings.verify_audit_trail(booking).await?;
            println!("Booking {} audit trail is consistent", booking);
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
