//! Who may do what to which record.
//!
//! Every service operation builds a [`Resource`] for the record it is about to
//! touch and asks [`ensure`] before reading or writing it. List operations use
//! [`list_scope`] to filter rather than deny.

use crate::error::{Error, Result};

/// The identity an operation runs as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    User { id: i32, is_manager: bool },
}

impl Actor {
    pub fn user(id: i32) -> Self {
        Actor::User {
            id,
            is_manager: false,
        }
    }

    pub fn manager(id: i32) -> Self {
        Actor::User {
            id,
            is_manager: true,
        }
    }

    pub fn id(&self) -> Option<i32> {
        match self {
            Actor::Anonymous => None,
            Actor::User { id, .. } => Some(*id),
        }
    }

    pub fn is_manager(&self) -> bool {
        matches!(self, Actor::User { is_manager: true, .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Recipient,
    Message,
    Mailing,
    User,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
    Dispatch,
    /// Enable/disable a mailing, block/unblock a user.
    Moderate,
}

/// The record being acted on. `owner_id` is `None` for records that do not
/// exist yet; for [`Kind::User`] it is the user's own id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resource {
    pub kind: Kind,
    pub owner_id: Option<i32>,
}

impl Resource {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            owner_id: None,
        }
    }

    pub fn owned(kind: Kind, owner_id: i32) -> Self {
        Self {
            kind,
            owner_id: Some(owner_id),
        }
    }
}

pub fn can_access(actor: &Actor, resource: &Resource, action: Action) -> bool {
    let Actor::User { id, is_manager } = *actor else {
        return false;
    };
    let own = match resource.owner_id {
        Some(owner) => owner == id,
        None => action == Action::Create,
    };

    match resource.kind {
        Kind::User => {
            is_manager
                && match action {
                    Action::View => true,
                    // No self-blocking.
                    Action::Moderate => resource.owner_id != Some(id),
                    Action::Create | Action::Update | Action::Delete | Action::Dispatch => false,
                }
        }
        Kind::Recipient | Kind::Mailing if is_manager => match action {
            Action::View => true,
            Action::Moderate => resource.kind == Kind::Mailing,
            Action::Create | Action::Update | Action::Delete | Action::Dispatch => false,
        },
        Kind::Recipient | Kind::Message => {
            own && !matches!(action, Action::Dispatch | Action::Moderate)
        }
        Kind::Mailing => own,
    }
}

pub fn ensure(actor: &Actor, resource: &Resource, action: Action) -> Result<()> {
    if can_access(actor, resource, action) {
        Ok(())
    } else {
        Err(Error::PermissionDenied)
    }
}

/// Which owners' records a list operation returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListScope {
    All,
    OwnedBy(i32),
}

pub fn list_scope(actor: &Actor, kind: Kind) -> Result<ListScope> {
    match *actor {
        Actor::Anonymous => Err(Error::PermissionDenied),
        Actor::User {
            is_manager: true, ..
        } if matches!(kind, Kind::Recipient | Kind::Mailing | Kind::User) => Ok(ListScope::All),
        Actor::User { .. } if kind == Kind::User => Err(Error::PermissionDenied),
        Actor::User { id, .. } => Ok(ListScope::OwnedBy(id)),
    }
}
