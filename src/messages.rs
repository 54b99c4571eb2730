//! Message catalog: reusable subject/body templates.

use entity::{mailing, message, prelude::*};
use sea_orm::{prelude::*, ActiveValue::Set, QueryOrder, TransactionTrait};
use tracing::info;

use crate::{
    access::{ensure, list_scope, Action, Actor, Kind, ListScope, Resource},
    error::{Error, Result},
    mailings,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageForm {
    pub subject: String,
    pub body: String,
}

impl MessageForm {
    fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(Error::Validation("subject must not be empty".into()));
        }
        if self.subject.chars().count() > 255 {
            return Err(Error::Validation("subject is longer than 255 characters".into()));
        }
        Ok(())
    }
}

pub async fn create(
    db: &DatabaseConnection,
    actor: &Actor,
    form: &MessageForm,
) -> Result<message::Model> {
    ensure(actor, &Resource::new(Kind::Message), Action::Create)?;
    let owner_id = actor.id().ok_or(Error::PermissionDenied)?;
    form.validate()?;

    let message = message::ActiveModel {
        subject: Set(form.subject.trim().to_owned()),
        body: Set(form.body.clone()),
        owner_id: Set(owner_id),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(message_id = message.id, owner_id, "created message");
    Ok(message)
}

pub async fn get(db: &DatabaseConnection, actor: &Actor, id: i32) -> Result<message::Model> {
    let message = find(db, actor, id).await?;
    ensure(
        actor,
        &Resource::owned(Kind::Message, message.owner_id),
        Action::View,
    )?;
    Ok(message)
}

pub async fn list(db: &DatabaseConnection, actor: &Actor) -> Result<Vec<message::Model>> {
    let mut query = Message::find().order_by_asc(message::Column::Id);
    if let ListScope::OwnedBy(owner_id) = list_scope(actor, Kind::Message)? {
        query = query.filter(message::Column::OwnerId.eq(owner_id));
    }
    Ok(query.all(db).await?)
}

pub async fn update(
    db: &DatabaseConnection,
    actor: &Actor,
    id: i32,
    form: &MessageForm,
) -> Result<message::Model> {
    let message = find(db, actor, id).await?;
    ensure(
        actor,
        &Resource::owned(Kind::Message, message.owner_id),
        Action::Update,
    )?;
    form.validate()?;

    let mut active: message::ActiveModel = message.into();
    active.subject = Set(form.subject.trim().to_owned());
    active.body = Set(form.body.clone());
    let message = active.update(db).await?;

    info!(message_id = id, "updated message");
    Ok(message)
}

/// Deletes a message together with every mailing that sends it.
pub async fn delete(db: &DatabaseConnection, actor: &Actor, id: i32) -> Result<()> {
    let message = find(db, actor, id).await?;
    ensure(
        actor,
        &Resource::owned(Kind::Message, message.owner_id),
        Action::Delete,
    )?;

    let txn = db.begin().await?;
    let mailing_ids: Vec<i32> = Mailing::find()
        .filter(mailing::Column::MessageId.eq(id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|m| m.id)
        .collect();
    for mailing_id in &mailing_ids {
        mailings::delete_cascade(&txn, *mailing_id).await?;
    }
    Message::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    info!(message_id = id, mailings = mailing_ids.len(), "deleted message");
    Ok(())
}

async fn find(db: &DatabaseConnection, actor: &Actor, id: i32) -> Result<message::Model> {
    if actor.id().is_none() {
        return Err(Error::PermissionDenied);
    }
    Message::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("message", id))
}
