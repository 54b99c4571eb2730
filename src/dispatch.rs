//! Sends a mailing to its recipients, one attempt record per recipient.
//!
//! A run claims the mailing by moving it to `running` in a single
//! conditional update, so of several concurrent triggers exactly one sends.
//! Recipients that already have a successful attempt for the mailing are left
//! out, which makes a retry after a partial run resume rather than repeat.
//!
//! The claim doubles as a lease. `last_attempt` holds the stamp of the run that
//! owns the mailing; the run renews it before every send and every later status
//! write is conditional on it. A run whose mailing was released under it (see
//! [`crate::scheduler::release_stale`]) notices at its next renewal and stops.

use std::sync::Arc;

use chrono::{DateTime, DurationRound, Utc};
use entity::{mailing, mailing_attempt, prelude::*, recipient};
use sea_orm::{
    prelude::*,
    sea_query::{Expr, Query},
    ActiveValue::Set,
    FromQueryResult, PaginatorTrait, QueryOrder, QuerySelect, TransactionTrait,
};
use tracing::{info, instrument, warn};

use crate::{
    access::{ensure, Action, Actor, Kind, Resource},
    error::{Error, Result},
    transport::{Email, Transport, SUCCESS_RESPONSE},
};

/// Recipients are read in id order, this many at a time.
const BATCH_SIZE: u64 = 500;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchResult {
    pub sent: u32,
    pub failed: u32,
    /// Set when the run did not happen, or stopped early.
    pub skipped: Option<SkipReason>,
}

impl DispatchResult {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The mailing was in a status no run may start from.
    Ineligible(MailingStatus),
    Disabled,
    /// Another run claimed the mailing first.
    AlreadyClaimed,
    /// The mailing was released while this run was sending. The counts cover
    /// what was sent before the run stopped; the status was left alone.
    ClaimLost,
}

#[derive(Debug, FromQueryResult)]
struct Target {
    id: i32,
    email: String,
}

/// Ownership of a running mailing: the `last_attempt` value its run wrote.
#[derive(Clone, Copy, Debug)]
struct Lease {
    mailing_id: i32,
    stamp: DateTime<Utc>,
}

enum Claim {
    Won(Lease),
    Skipped(SkipReason),
}

/// Counts of a run that got through its recipients, or lost its lease.
struct Run {
    sent: u32,
    failed: u32,
    previously_sent: u64,
    lease: Option<Lease>,
}

/// A run cut short by an error, with what it had sent so far.
struct Abort {
    sent: u32,
    lease: Lease,
    error: Error,
}

impl Abort {
    fn new(sent: u32, lease: Lease, error: impl Into<Error>) -> Self {
        Self {
            sent,
            lease,
            error: error.into(),
        }
    }
}

/// Millisecond precision, so the stamp compares equal after a round trip
/// through any backend.
fn lease_stamp() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(chrono::Duration::milliseconds(1)).unwrap_or(now)
}

/// Status a run leaves behind. `previously_sent` counts successes from
/// earlier runs of the same mailing.
pub fn final_status(sent: u32, failed: u32, previously_sent: u64) -> MailingStatus {
    if failed == 0 {
        MailingStatus::Completed
    } else if sent > 0 || previously_sent > 0 {
        MailingStatus::PartiallyCompleted
    } else {
        MailingStatus::Failed
    }
}

#[derive(Clone)]
pub struct DispatchEngine {
    db: DatabaseConnection,
    transport: Arc<dyn Transport>,
    from: String,
}

impl DispatchEngine {
    pub fn new(
        db: DatabaseConnection,
        transport: Arc<dyn Transport>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            db,
            transport,
            from: from.into(),
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Checks that `actor` may trigger a send of `mailing_id`.
    pub async fn authorize(&self, actor: &Actor, mailing_id: i32) -> Result<()> {
        if actor.id().is_none() {
            return Err(Error::PermissionDenied);
        }
        let mailing = Mailing::find_by_id(mailing_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| Error::not_found("mailing", mailing_id))?;
        ensure(
            actor,
            &Resource::owned(Kind::Mailing, mailing.owner_id),
            Action::Dispatch,
        )
    }

    /// Runs a send now on behalf of `actor`.
    pub async fn dispatch_as(&self, actor: &Actor, mailing_id: i32) -> Result<DispatchResult> {
        self.authorize(actor, mailing_id).await?;
        self.dispatch(mailing_id).await
    }

    /// Dispatches each id in turn. A failure on one does not stop the rest.
    pub async fn dispatch_each(
        &self,
        mailing_ids: &[i32],
    ) -> Vec<(i32, Result<DispatchResult>)> {
        let mut results = Vec::with_capacity(mailing_ids.len());
        for &mailing_id in mailing_ids {
            results.push((mailing_id, self.dispatch(mailing_id).await));
        }
        results
    }

    #[instrument(skip(self))]
    pub async fn dispatch(&self, mailing_id: i32) -> Result<DispatchResult> {
        let mailing = Mailing::find_by_id(mailing_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| Error::not_found("mailing", mailing_id))?;

        let lease = match self.claim(&mailing).await? {
            Claim::Won(lease) => lease,
            Claim::Skipped(reason) => {
                info!(?reason, "skipping dispatch");
                return Ok(DispatchResult::skipped(reason));
            }
        };
        info!("claimed mailing");

        let run = match self.run(&mailing, lease).await {
            Ok(run) => run,
            Err(abort) => {
                // Hand the mailing back so a retry can resume.
                let delivered =
                    abort.sent > 0 || mailing.status == MailingStatus::PartiallyCompleted;
                let status = if delivered {
                    MailingStatus::PartiallyCompleted
                } else {
                    MailingStatus::Created
                };
                warn!(error = %abort.error, ?status, "dispatch aborted, releasing mailing");
                match self.renew(abort.lease, status).await {
                    Ok(Some(_)) => {}
                    Ok(None) => warn!("mailing was already released"),
                    Err(e) => warn!(error = %e, "could not release mailing"),
                }
                return Err(abort.error);
            }
        };

        let (sent, failed) = (run.sent, run.failed);
        let lost = DispatchResult {
            sent,
            failed,
            skipped: Some(SkipReason::ClaimLost),
        };
        let Some(lease) = run.lease else {
            warn!(sent, failed, "mailing released mid-run, stopping");
            return Ok(lost);
        };

        let status = final_status(sent, failed, run.previously_sent);
        if self.renew(lease, status).await?.is_none() {
            warn!(sent, failed, ?status, "mailing released before the run could finish it");
            return Ok(lost);
        }
        info!(sent, failed, ?status, "dispatch finished");

        Ok(DispatchResult {
            sent,
            failed,
            skipped: None,
        })
    }

    /// Moves the mailing to `running` under a fresh lease.
    async fn claim(&self, mailing: &mailing::Model) -> Result<Claim> {
        if !mailing.is_active {
            return Ok(Claim::Skipped(SkipReason::Disabled));
        }
        if !mailing.status.is_dispatchable() {
            return Ok(Claim::Skipped(SkipReason::Ineligible(mailing.status)));
        }

        let stamp = lease_stamp();
        let txn = self.db.begin().await?;
        let claimed = Mailing::update_many()
            .col_expr(mailing::Column::Status, Expr::value(MailingStatus::Running))
            .col_expr(mailing::Column::LastAttempt, Expr::value(stamp))
            .filter(mailing::Column::Id.eq(mailing.id))
            .filter(mailing::Column::Status.is_in(MailingStatus::DISPATCHABLE))
            .filter(mailing::Column::IsActive.eq(true))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        Ok(if claimed.rows_affected == 0 {
            Claim::Skipped(SkipReason::AlreadyClaimed)
        } else {
            Claim::Won(Lease {
                mailing_id: mailing.id,
                stamp,
            })
        })
    }

    /// Writes `status` and a fresh stamp if `lease` still owns the mailing.
    /// Returns the renewed lease, or `None` once ownership is gone.
    async fn renew(&self, lease: Lease, status: MailingStatus) -> Result<Option<Lease>, DbErr> {
        let stamp = lease_stamp();
        let renewed = Mailing::update_many()
            .col_expr(mailing::Column::Status, Expr::value(status))
            .col_expr(mailing::Column::LastAttempt, Expr::value(stamp))
            .filter(mailing::Column::Id.eq(lease.mailing_id))
            .filter(mailing::Column::Status.eq(MailingStatus::Running))
            .filter(mailing::Column::LastAttempt.eq(lease.stamp))
            .exec(&self.db)
            .await?;
        Ok((renewed.rows_affected > 0).then_some(Lease { stamp, ..lease }))
    }

    /// Sends to every pending recipient, renewing the lease before each one.
    async fn run(&self, mailing: &mailing::Model, mut lease: Lease) -> Result<Run, Abort> {
        let mut sent = 0;
        let mut failed = 0;

        let previously_sent = MailingAttempt::find()
            .filter(mailing_attempt::Column::MailingId.eq(mailing.id))
            .filter(mailing_attempt::Column::Status.eq(AttemptStatus::Success))
            .count(&self.db)
            .await
            .map_err(move |e| Abort::new(0, lease, e))?;

        let message = match Message::find_by_id(mailing.message_id).one(&self.db).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                let error = Error::not_found("message", mailing.message_id);
                return Err(Abort::new(0, lease, error));
            }
            Err(e) => return Err(Abort::new(0, lease, e)),
        };

        let mut after = 0;
        loop {
            let batch = self
                .pending_targets(mailing, after)
                .await
                .map_err(move |e| Abort::new(sent, lease, e))?;
            if batch.is_empty() {
                break;
            }

            for target in batch {
                let renewed = self
                    .renew(lease, MailingStatus::Running)
                    .await
                    .map_err(move |e| Abort::new(sent, lease, e))?;
                lease = match renewed {
                    Some(lease) => lease,
                    None => {
                        return Ok(Run {
                            sent,
                            failed,
                            previously_sent,
                            lease: None,
                        })
                    }
                };

                let email = Email {
                    subject: &message.subject,
                    body: &message.body,
                    from: &self.from,
                    to: &target.email,
                };
                let (status, server_response) = match self.transport.send(&email).await {
                    Ok(()) => {
                        sent += 1;
                        (AttemptStatus::Success, SUCCESS_RESPONSE.to_string())
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(recipient_id = target.id, error = %e, "send failed");
                        (AttemptStatus::Failed, e.to_string())
                    }
                };

                mailing_attempt::ActiveModel {
                    mailing_id: Set(mailing.id),
                    recipient_id: Set(Some(target.id)),
                    attempt_time: Set(Utc::now()),
                    status: Set(status),
                    server_response: Set(server_response),
                    ..Default::default()
                }
                .insert(&self.db)
                .await
                .map_err(move |e| Abort::new(sent, lease, e))?;

                after = target.id;
            }
        }

        Ok(Run {
            sent,
            failed,
            previously_sent,
            lease: Some(lease),
        })
    }

    /// Next batch of recipients with an id above `after` and no successful
    /// attempt for this mailing. Only id and email are loaded.
    async fn pending_targets(
        &self,
        mailing: &mailing::Model,
        after: i32,
    ) -> Result<Vec<Target>, DbErr> {
        let delivered = Query::select()
            .column(mailing_attempt::Column::RecipientId)
            .from(MailingAttempt)
            .and_where(mailing_attempt::Column::MailingId.eq(mailing.id))
            .and_where(mailing_attempt::Column::Status.eq(AttemptStatus::Success))
            .and_where(mailing_attempt::Column::RecipientId.is_not_null())
            .to_owned();

        mailing
            .find_related(Recipient)
            .select_only()
            .column(recipient::Column::Id)
            .column(recipient::Column::Email)
            .filter(recipient::Column::Id.gt(after))
            .filter(recipient::Column::Id.not_in_subquery(delivered))
            .order_by_asc(recipient::Column::Id)
            .limit(BATCH_SIZE)
            .into_model::<Target>()
            .all(&self.db)
            .await
    }
}
