//! Recipient directory.

use entity::{mailing_attempt, mailing_recipient, prelude::*, recipient};
use sea_orm::{prelude::*, sea_query::Expr, ActiveValue::Set, QueryOrder, TransactionTrait};
use tracing::info;

use crate::{
    access::{ensure, list_scope, Action, Actor, Kind, ListScope, Resource},
    error::{Error, Result},
    users::normalize_email,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientForm {
    pub email: String,
    pub full_name: String,
    pub comment: Option<String>,
}

impl RecipientForm {
    fn clean(&self) -> Result<RecipientForm> {
        let full_name = self.full_name.trim();
        if full_name.is_empty() {
            return Err(Error::Validation("full name must not be empty".into()));
        }
        Ok(RecipientForm {
            email: normalize_email(&self.email)?,
            full_name: full_name.to_owned(),
            comment: self
                .comment
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_owned),
        })
    }
}

pub async fn create(
    db: &DatabaseConnection,
    actor: &Actor,
    form: &RecipientForm,
) -> Result<recipient::Model> {
    ensure(actor, &Resource::new(Kind::Recipient), Action::Create)?;
    let owner_id = actor.id().ok_or(Error::PermissionDenied)?;
    let form = form.clean()?;
    ensure_email_free(db, &form.email, None).await?;

    let recipient = recipient::ActiveModel {
        email: Set(form.email.clone()),
        full_name: Set(form.full_name),
        comment: Set(form.comment),
        owner_id: Set(owner_id),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| duplicate(e, &form.email))?;

    info!(recipient_id = recipient.id, owner_id, "created recipient");
    Ok(recipient)
}

pub async fn get(db: &DatabaseConnection, actor: &Actor, id: i32) -> Result<recipient::Model> {
    let recipient = find(db, actor, id).await?;
    ensure(
        actor,
        &Resource::owned(Kind::Recipient, recipient.owner_id),
        Action::View,
    )?;
    Ok(recipient)
}

/// Own recipients, or everyone's for a manager.
pub async fn list(db: &DatabaseConnection, actor: &Actor) -> Result<Vec<recipient::Model>> {
    let mut query = Recipient::find().order_by_asc(recipient::Column::FullName);
    if let ListScope::OwnedBy(owner_id) = list_scope(actor, Kind::Recipient)? {
        query = query.filter(recipient::Column::OwnerId.eq(owner_id));
    }
    Ok(query.all(db).await?)
}

pub async fn update(
    db: &DatabaseConnection,
    actor: &Actor,
    id: i32,
    form: &RecipientForm,
) -> Result<recipient::Model> {
    let recipient = find(db, actor, id).await?;
    ensure(
        actor,
        &Resource::owned(Kind::Recipient, recipient.owner_id),
        Action::Update,
    )?;
    let form = form.clean()?;
    ensure_email_free(db, &form.email, Some(id)).await?;

    let mut active: recipient::ActiveModel = recipient.into();
    active.email = Set(form.email.clone());
    active.full_name = Set(form.full_name);
    active.comment = Set(form.comment);
    let recipient = active.update(db).await.map_err(|e| duplicate(e, &form.email))?;

    info!(recipient_id = id, "updated recipient");
    Ok(recipient)
}

/// Deletes a recipient. Past attempts keep their row with the recipient
/// reference nulled; mailings simply stop including it.
pub async fn delete(db: &DatabaseConnection, actor: &Actor, id: i32) -> Result<()> {
    let recipient = find(db, actor, id).await?;
    ensure(
        actor,
        &Resource::owned(Kind::Recipient, recipient.owner_id),
        Action::Delete,
    )?;

    let txn = db.begin().await?;
    MailingAttempt::update_many()
        .col_expr(
            mailing_attempt::Column::RecipientId,
            Expr::value(Option::<i32>::None),
        )
        .filter(mailing_attempt::Column::RecipientId.eq(id))
        .exec(&txn)
        .await?;
    MailingRecipient::delete_many()
        .filter(mailing_recipient::Column::RecipientId.eq(id))
        .exec(&txn)
        .await?;
    Recipient::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    info!(recipient_id = id, "deleted recipient");
    Ok(())
}

async fn find(db: &DatabaseConnection, actor: &Actor, id: i32) -> Result<recipient::Model> {
    if actor.id().is_none() {
        return Err(Error::PermissionDenied);
    }
    Recipient::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("recipient", id))
}

async fn ensure_email_free(
    db: &DatabaseConnection,
    email: &str,
    except: Option<i32>,
) -> Result<()> {
    let mut query = Recipient::find().filter(recipient::Column::Email.eq(email));
    if let Some(id) = except {
        query = query.filter(recipient::Column::Id.ne(id));
    }
    match query.one(db).await? {
        Some(_) => Err(Error::Validation(format!(
            "recipient with email {email} already exists"
        ))),
        None => Ok(()),
    }
}

fn duplicate(err: DbErr, email: &str) -> Error {
    Error::unique_violation(err, format!("recipient with email {email} already exists"))
}
