//! Periodic trigger: finds mailings whose window is open and sends them.

use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use entity::{mailing, mailing_attempt, prelude::*};
use futures::{stream, StreamExt};
use sea_orm::{prelude::*, sea_query::Expr, PaginatorTrait, QueryOrder, QuerySelect};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::{
    dispatch::{DispatchEngine, DispatchResult},
    error::Result,
    queue::QueueHandle,
};

/// Active mailings still in `created` with `start_time <= now <= end_time`.
pub async fn due_mailings(db: &DatabaseConnection, now: DateTime<Utc>) -> Result<Vec<i32>> {
    Ok(Mailing::find()
        .select_only()
        .column(mailing::Column::Id)
        .filter(mailing::Column::Status.eq(MailingStatus::Created))
        .filter(mailing::Column::IsActive.eq(true))
        .filter(mailing::Column::StartTime.lte(now))
        .filter(mailing::Column::EndTime.gte(now))
        .order_by_asc(mailing::Column::StartTime)
        .into_tuple::<i32>()
        .all(db)
        .await?)
}

/// Hands back mailings whose run has not renewed its lease for longer than
/// `stale_after`, as happens when a process dies mid-send. They return to
/// `partially_completed` if anything was delivered, otherwise to `created`.
pub async fn release_stale(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<u64> {
    let Ok(stale_after) = chrono::Duration::from_std(stale_after) else {
        return Ok(0);
    };
    let cutoff = now - stale_after;

    let stale = Mailing::find()
        .filter(mailing::Column::Status.eq(MailingStatus::Running))
        .filter(mailing::Column::LastAttempt.lt(cutoff))
        .all(db)
        .await?;

    let mut released = 0;
    for mailing in stale {
        let delivered = MailingAttempt::find()
            .filter(mailing_attempt::Column::MailingId.eq(mailing.id))
            .filter(mailing_attempt::Column::Status.eq(AttemptStatus::Success))
            .count(db)
            .await?;
        let status = if delivered > 0 {
            MailingStatus::PartiallyCompleted
        } else {
            MailingStatus::Created
        };

        // Conditional so a run that finished or renewed its lease meanwhile
        // keeps the mailing.
        let result = Mailing::update_many()
            .col_expr(mailing::Column::Status, Expr::value(status))
            .filter(mailing::Column::Id.eq(mailing.id))
            .filter(mailing::Column::Status.eq(MailingStatus::Running))
            .filter(mailing::Column::LastAttempt.lt(cutoff))
            .exec(db)
            .await?;
        if result.rows_affected > 0 {
            warn!(mailing_id = mailing.id, ?status, "released stale mailing");
            released += 1;
        }
    }
    Ok(released)
}

/// One scheduler tick through the task dispatcher.
pub async fn enqueue_due(
    db: &DatabaseConnection,
    queue: &QueueHandle,
    now: DateTime<Utc>,
) -> Result<usize> {
    let due = due_mailings(db, now).await?;
    for mailing_id in &due {
        queue.enqueue(*mailing_id)?;
    }
    Ok(due.len())
}

/// One scheduler tick run in place, up to `concurrency` mailings at a time.
pub async fn dispatch_due(
    engine: &DispatchEngine,
    now: DateTime<Utc>,
    concurrency: usize,
) -> Result<Vec<(i32, Result<DispatchResult>)>> {
    let due = due_mailings(engine.db(), now).await?;
    Ok(stream::iter(due)
        .map(|mailing_id| async move { (mailing_id, engine.dispatch(mailing_id).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await)
}

/// Ticks every `every` until `shutdown` resolves.
pub async fn run(
    db: DatabaseConnection,
    queue: QueueHandle,
    every: Duration,
    stale_after: Duration,
    shutdown: impl Future<Output = ()>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let now = Utc::now();
                if let Err(e) = release_stale(&db, now, stale_after).await {
                    error!(error = %e, "could not release stale mailings");
                }
                match enqueue_due(&db, &queue, now).await {
                    Ok(count) => info!(count, "scheduler tick"),
                    Err(e) => error!(error = %e, "scheduler tick failed"),
                }
            }
        }
    }
    info!("scheduler stopped");
}
