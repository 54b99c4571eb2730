//! Accounts and the manager role.

use chrono::Utc;
use entity::{prelude::*, user};
use lettre::Address;
use sea_orm::{prelude::*, ActiveValue::Set, QueryOrder};
use tracing::info;

use crate::{
    access::{ensure, list_scope, Action, Actor, Kind, Resource},
    error::{Error, Result},
};

pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    email: &str,
) -> Result<user::Model> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::Validation("username must not be empty".into()));
    }
    let email = normalize_email(email)?;

    let taken = User::find()
        .filter(
            user::Column::Username
                .eq(username)
                .or(user::Column::Email.eq(email.as_str())),
        )
        .one(db)
        .await?;
    if taken.is_some() {
        return Err(Error::Validation(format!(
            "user {username} or email {email} already exists"
        )));
    }

    let user = user::ActiveModel {
        username: Set(username.to_owned()),
        email: Set(email.clone()),
        is_active: Set(true),
        is_manager: Set(false),
        date_joined: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| Error::unique_violation(e, format!("email {email} already exists")))?;

    info!(user_id = user.id, username = %user.username, "created user");
    Ok(user)
}

/// Administrative: grants or revokes the manager role.
pub async fn set_manager(
    db: &DatabaseConnection,
    user_id: i32,
    is_manager: bool,
) -> Result<user::Model> {
    let user = find(db, user_id).await?;
    let mut active: user::ActiveModel = user.into();
    active.is_manager = Set(is_manager);
    let user = active.update(db).await?;
    info!(user_id, is_manager, "changed manager role");
    Ok(user)
}

/// Blocks or unblocks a user. Managers only, and never on themselves.
pub async fn set_active(
    db: &DatabaseConnection,
    actor: &Actor,
    user_id: i32,
    is_active: bool,
) -> Result<user::Model> {
    if actor.id().is_none() {
        return Err(Error::PermissionDenied);
    }
    let user = find(db, user_id).await?;
    ensure(actor, &Resource::owned(Kind::User, user.id), Action::Moderate)?;

    let mut active: user::ActiveModel = user.into();
    active.is_active = Set(is_active);
    let user = active.update(db).await?;
    info!(user_id, is_active, by = ?actor.id(), "changed user active flag");
    Ok(user)
}

pub async fn list_users(db: &DatabaseConnection, actor: &Actor) -> Result<Vec<user::Model>> {
    list_scope(actor, Kind::User)?;
    Ok(User::find()
        .order_by_asc(user::Column::Username)
        .all(db)
        .await?)
}

/// Resolves the acting identity. Unknown and blocked users act anonymously.
pub async fn load_actor(db: &DatabaseConnection, user_id: i32) -> Result<Actor> {
    Ok(match User::find_by_id(user_id).one(db).await? {
        Some(user) if user.is_active => Actor::User {
            id: user.id,
            is_manager: user.is_manager,
        },
        _ => Actor::Anonymous,
    })
}

pub async fn find_by_username(db: &DatabaseConnection, username: &str) -> Result<user::Model> {
    User::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("user", username))
}

async fn find(db: &DatabaseConnection, user_id: i32) -> Result<user::Model> {
    User::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("user", user_id))
}

/// Trims, validates and lowercases an address.
pub(crate) fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    email
        .parse::<Address>()
        .map_err(|e| Error::Validation(format!("invalid email {email}: {e}")))?;
    Ok(email)
}
