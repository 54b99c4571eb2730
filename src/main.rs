use std::{process, sync::Arc};

use chrono::Utc;
use clap::{Parser, Subcommand};
use entity::prelude::MailingStatus;
use mailing_service::{
    db,
    dispatch::{DispatchEngine, DispatchResult, SkipReason},
    error::{Error, Result},
    scheduler,
    settings::Settings,
    transport::SmtpTransport,
    users,
};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value_t = Settings::default_path())]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher and the periodic trigger until Ctrl-C (default).
    Run,
    /// Apply pending database migrations.
    Migrate,
    /// Send the given mailings now.
    Send {
        #[arg(required = true)]
        mailing_ids: Vec<i32>,
    },
    /// Send every mailing whose window is open, once.
    SendDue,
    /// Create a user account.
    CreateUser {
        username: String,
        email: String,
        #[arg(long)]
        manager: bool,
    },
    /// Grant (or with --revoke, remove) the manager role.
    GrantManager {
        username: String,
        #[arg(long)]
        revoke: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::new(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read configuration from {}: {e}", cli.config);
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(settings.get_log_level())
        .init();

    if let Err(e) = run(cli, settings).await {
        error!(error = %e, "command failed");
        process::exit(1);
    }
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            mailing_service::real_main(cli.config, signal::ctrl_c()).await?;
        }
        Command::Migrate => {
            db::connect_and_migrate(&settings.get_db_url()).await?;
            info!("migrations applied");
        }
        Command::Send { mailing_ids } => {
            let engine = engine(&settings).await?;
            for (mailing_id, result) in engine.dispatch_each(&mailing_ids).await {
                match result {
                    Ok(DispatchResult {
                        skipped: Some(SkipReason::Ineligible(MailingStatus::Completed)),
                        ..
                    }) => warn!(mailing_id, "mailing already sent"),
                    Ok(result) => info!(mailing_id, ?result, "mailing sent"),
                    Err(Error::NotFound { .. }) => warn!(mailing_id, "mailing not found"),
                    Err(e) => error!(mailing_id, error = %e, "mailing failed"),
                }
            }
        }
        Command::SendDue => {
            let engine = engine(&settings).await?;
            let concurrency = settings.get_queue().concurrency;
            let results = scheduler::dispatch_due(&engine, Utc::now(), concurrency).await?;
            for (mailing_id, result) in &results {
                match result {
                    Ok(result) => info!(mailing_id, ?result, "processed mailing"),
                    Err(e) => error!(mailing_id, error = %e, "mailing failed"),
                }
            }
            info!(count = results.len(), "processed due mailings");
        }
        Command::CreateUser {
            username,
            email,
            manager,
        } => {
            let db = db::connect_and_migrate(&settings.get_db_url()).await?;
            let user = users::create_user(&db, &username, &email).await?;
            if manager {
                users::set_manager(&db, user.id, true).await?;
            }
        }
        Command::GrantManager { username, revoke } => {
            let db = db::connect_and_migrate(&settings.get_db_url()).await?;
            let user = users::find_by_username(&db, &username).await?;
            users::set_manager(&db, user.id, !revoke).await?;
        }
    }
    Ok(())
}

async fn engine(settings: &Settings) -> Result<DispatchEngine> {
    let db = db::connect_and_migrate(&settings.get_db_url()).await?;
    let transport = SmtpTransport::from_settings(settings.get_smtp())?;
    Ok(DispatchEngine::new(
        db,
        Arc::new(transport),
        settings.get_from_address(),
    ))
}
