//! Mailings: one message, a recipient set, a send window and a status.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use entity::{mailing, mailing_attempt, mailing_recipient, prelude::*, recipient};
use sea_orm::{
    prelude::*, ActiveValue::Set, ConnectionTrait, PaginatorTrait, QueryOrder, TransactionTrait,
};
use tracing::info;

use crate::{
    access::{ensure, list_scope, Action, Actor, Kind, ListScope, Resource},
    error::{Error, Result},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailingForm {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub message_id: i32,
    pub recipient_ids: Vec<i32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttemptStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
}

pub async fn create(
    db: &DatabaseConnection,
    actor: &Actor,
    form: &MailingForm,
) -> Result<mailing::Model> {
    ensure(actor, &Resource::new(Kind::Mailing), Action::Create)?;
    let owner_id = actor.id().ok_or(Error::PermissionDenied)?;
    let recipient_ids = validate(db, owner_id, form).await?;

    let txn = db.begin().await?;
    let mailing = mailing::ActiveModel {
        start_time: Set(form.start_time),
        end_time: Set(form.end_time),
        status: Set(MailingStatus::Created),
        created_at: Set(Utc::now()),
        last_attempt: Set(None),
        message_id: Set(form.message_id),
        owner_id: Set(owner_id),
        is_active: Set(true),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    link_recipients(&txn, mailing.id, &recipient_ids).await?;
    txn.commit().await?;

    info!(
        mailing_id = mailing.id,
        owner_id,
        recipients = recipient_ids.len(),
        "created mailing"
    );
    Ok(mailing)
}

pub async fn get(db: &DatabaseConnection, actor: &Actor, id: i32) -> Result<mailing::Model> {
    let mailing = find(db, actor, id).await?;
    ensure(
        actor,
        &Resource::owned(Kind::Mailing, mailing.owner_id),
        Action::View,
    )?;
    Ok(mailing)
}

/// Own mailings, or everyone's for a manager. Newest first.
pub async fn list(db: &DatabaseConnection, actor: &Actor) -> Result<Vec<mailing::Model>> {
    let mut query = Mailing::find()
        .order_by_desc(mailing::Column::CreatedAt)
        .order_by_desc(mailing::Column::Id);
    if let ListScope::OwnedBy(owner_id) = list_scope(actor, Kind::Mailing)? {
        query = query.filter(mailing::Column::OwnerId.eq(owner_id));
    }
    Ok(query.all(db).await?)
}

/// Replaces the window, message and recipient set. The status is untouched.
pub async fn update(
    db: &DatabaseConnection,
    actor: &Actor,
    id: i32,
    form: &MailingForm,
) -> Result<mailing::Model> {
    let mailing = find(db, actor, id).await?;
    ensure(
        actor,
        &Resource::owned(Kind::Mailing, mailing.owner_id),
        Action::Update,
    )?;
    let recipient_ids = validate(db, mailing.owner_id, form).await?;

    let txn = db.begin().await?;
    let mut active: mailing::ActiveModel = mailing.into();
    active.start_time = Set(form.start_time);
    active.end_time = Set(form.end_time);
    active.message_id = Set(form.message_id);
    let mailing = active.update(&txn).await?;
    MailingRecipient::delete_many()
        .filter(mailing_recipient::Column::MailingId.eq(id))
        .exec(&txn)
        .await?;
    link_recipients(&txn, id, &recipient_ids).await?;
    txn.commit().await?;

    info!(mailing_id = id, recipients = recipient_ids.len(), "updated mailing");
    Ok(mailing)
}

pub async fn delete(db: &DatabaseConnection, actor: &Actor, id: i32) -> Result<()> {
    let mailing = find(db, actor, id).await?;
    ensure(
        actor,
        &Resource::owned(Kind::Mailing, mailing.owner_id),
        Action::Delete,
    )?;

    let txn = db.begin().await?;
    delete_cascade(&txn, id).await?;
    txn.commit().await?;

    info!(mailing_id = id, "deleted mailing");
    Ok(())
}

/// Enables or disables a mailing. Open to the owner and to managers.
pub async fn set_active(
    db: &DatabaseConnection,
    actor: &Actor,
    id: i32,
    is_active: bool,
) -> Result<mailing::Model> {
    let mailing = find(db, actor, id).await?;
    ensure(
        actor,
        &Resource::owned(Kind::Mailing, mailing.owner_id),
        Action::Moderate,
    )?;

    // Only the flag is written so a concurrent dispatch keeps its status.
    let mailing = mailing::ActiveModel {
        id: Set(id),
        is_active: Set(is_active),
        ..Default::default()
    }
    .update(db)
    .await?;

    info!(mailing_id = id, is_active, by = ?actor.id(), "changed mailing active flag");
    Ok(mailing)
}

pub async fn recipients(
    db: &DatabaseConnection,
    actor: &Actor,
    id: i32,
) -> Result<Vec<recipient::Model>> {
    let mailing = get(db, actor, id).await?;
    Ok(mailing
        .find_related(Recipient)
        .order_by_asc(recipient::Column::Id)
        .all(db)
        .await?)
}

/// The attempt log, most recent first.
pub async fn attempts(
    db: &DatabaseConnection,
    actor: &Actor,
    id: i32,
) -> Result<Vec<mailing_attempt::Model>> {
    get(db, actor, id).await?;
    Ok(MailingAttempt::find()
        .filter(mailing_attempt::Column::MailingId.eq(id))
        .order_by_desc(mailing_attempt::Column::AttemptTime)
        .order_by_desc(mailing_attempt::Column::Id)
        .all(db)
        .await?)
}

pub async fn attempt_stats(
    db: &DatabaseConnection,
    actor: &Actor,
    id: i32,
) -> Result<AttemptStats> {
    get(db, actor, id).await?;
    let count = |status: AttemptStatus| {
        MailingAttempt::find()
            .filter(mailing_attempt::Column::MailingId.eq(id))
            .filter(mailing_attempt::Column::Status.eq(status))
            .count(db)
    };
    let success = count(AttemptStatus::Success).await?;
    let failed = count(AttemptStatus::Failed).await?;
    Ok(AttemptStats {
        total: success + failed,
        success,
        failed,
    })
}

/// Removes a mailing with its attempt log and recipient links.
pub(crate) async fn delete_cascade<C: ConnectionTrait>(conn: &C, id: i32) -> Result<(), DbErr> {
    MailingAttempt::delete_many()
        .filter(mailing_attempt::Column::MailingId.eq(id))
        .exec(conn)
        .await?;
    MailingRecipient::delete_many()
        .filter(mailing_recipient::Column::MailingId.eq(id))
        .exec(conn)
        .await?;
    Mailing::delete_by_id(id).exec(conn).await?;
    Ok(())
}

async fn find(db: &DatabaseConnection, actor: &Actor, id: i32) -> Result<mailing::Model> {
    if actor.id().is_none() {
        return Err(Error::PermissionDenied);
    }
    Mailing::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("mailing", id))
}

/// Checks the window and that the message and every recipient belong to
/// `owner_id`. Returns the de-duplicated recipient ids.
async fn validate(
    db: &DatabaseConnection,
    owner_id: i32,
    form: &MailingForm,
) -> Result<Vec<i32>> {
    if form.start_time >= form.end_time {
        return Err(Error::Validation(
            "start time must be earlier than end time".into(),
        ));
    }

    match Message::find_by_id(form.message_id).one(db).await? {
        Some(message) if message.owner_id == owner_id => {}
        _ => {
            return Err(Error::Validation(format!(
                "message {} is not one of yours",
                form.message_id
            )))
        }
    }

    let ids: Vec<i32> = form
        .recipient_ids
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        return Ok(ids);
    }

    let owned = Recipient::find()
        .filter(recipient::Column::Id.is_in(ids.clone()))
        .filter(recipient::Column::OwnerId.eq(owner_id))
        .count(db)
        .await?;
    if owned != ids.len() as u64 {
        return Err(Error::Validation(
            "every recipient must exist and be one of yours".into(),
        ));
    }
    Ok(ids)
}

async fn link_recipients<C: ConnectionTrait>(
    conn: &C,
    mailing_id: i32,
    recipient_ids: &[i32],
) -> Result<(), DbErr> {
    if recipient_ids.is_empty() {
        return Ok(());
    }
    MailingRecipient::insert_many(recipient_ids.iter().map(|&recipient_id| {
        mailing_recipient::ActiveModel {
            mailing_id: Set(mailing_id),
            recipient_id: Set(recipient_id),
            ..Default::default()
        }
    }))
    .exec(conn)
    .await?;
    Ok(())
}
