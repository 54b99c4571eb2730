use std::{future::Future, sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    dispatch::DispatchEngine,
    error::Result,
    queue::{DispatchQueue, RetryPolicy},
    settings::Settings,
    transport::SmtpTransport,
};

pub mod access;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod mailings;
pub mod messages;
pub mod queue;
pub mod recipients;
pub mod scheduler;
pub mod settings;
pub mod transport;
pub mod users;

#[cfg(test)]
mod tests;

/// Loads `config_file`, migrates the database and runs the dispatcher and
/// the periodic trigger until `shutdown` resolves.
pub async fn real_main<F>(config_file: String, shutdown: F) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let settings = Settings::new(&config_file)?;
    let db = db::connect_and_migrate(&settings.get_db_url()).await?;
    let transport = SmtpTransport::from_settings(settings.get_smtp())?;
    let engine = DispatchEngine::new(db, Arc::new(transport), settings.get_from_address());

    serve(
        engine,
        settings.get_queue().into(),
        settings.get_scheduler_interval(),
        settings.get_stale_after(),
        shutdown,
    )
    .await;
    Ok(())
}

pub async fn serve<F>(
    engine: DispatchEngine,
    policy: RetryPolicy,
    every: Duration,
    stale_after: Duration,
    shutdown: F,
) where
    F: Future<Output = std::io::Result<()>>,
{
    let queue = DispatchQueue::start(engine.clone(), policy);
    info!(?every, concurrency = policy.concurrency, "mailing service started");

    scheduler::run(
        engine.db().clone(),
        queue.handle(),
        every,
        stale_after,
        async {
            if let Err(e) = shutdown.await {
                warn!(error = %e, "shutdown signal failed");
            }
        },
    )
    .await;

    let stats = queue.shutdown().await;
    info!(?stats, "mailing service stopped");
}
