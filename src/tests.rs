use std::time::Duration;

use entity::prelude::MailingStatus;

use crate::{
    access::{can_access, list_scope, Action, Actor, Kind, ListScope, Resource},
    dispatch::final_status,
    queue::RetryPolicy,
    transport::{TransportError, TransportErrorKind},
};

const OWNER: i32 = 1;
const OTHER: i32 = 2;
const MANAGER: i32 = 3;

const ALL_ACTIONS: [Action; 6] = [
    Action::View,
    Action::Create,
    Action::Update,
    Action::Delete,
    Action::Dispatch,
    Action::Moderate,
];

#[test]
fn anonymous_can_do_nothing() {
    for kind in [Kind::Recipient, Kind::Message, Kind::Mailing, Kind::User] {
        for action in ALL_ACTIONS {
            assert!(!can_access(&Actor::Anonymous, &Resource::owned(kind, OWNER), action));
            assert!(!can_access(&Actor::Anonymous, &Resource::new(kind), action));
        }
        assert!(list_scope(&Actor::Anonymous, kind).is_err());
    }
}

#[test]
fn owner_has_full_rights_on_own_mailing() {
    let owner = Actor::user(OWNER);
    let mailing = Resource::owned(Kind::Mailing, OWNER);
    for action in ALL_ACTIONS {
        assert!(can_access(&owner, &mailing, action), "{action:?}");
    }
}

#[test]
fn owner_cannot_touch_other_owners_records() {
    let other = Actor::user(OTHER);
    for kind in [Kind::Recipient, Kind::Message, Kind::Mailing] {
        for action in ALL_ACTIONS {
            assert!(!can_access(&other, &Resource::owned(kind, OWNER), action));
        }
    }
}

#[test]
fn recipients_and_messages_cannot_be_dispatched_or_moderated() {
    let owner = Actor::user(OWNER);
    for kind in [Kind::Recipient, Kind::Message] {
        let resource = Resource::owned(kind, OWNER);
        assert!(can_access(&owner, &resource, Action::Update));
        assert!(can_access(&owner, &resource, Action::Delete));
        assert!(!can_access(&owner, &resource, Action::Dispatch));
        assert!(!can_access(&owner, &resource, Action::Moderate));
    }
}

#[test]
fn manager_reads_everything_but_writes_nothing() {
    let manager = Actor::manager(MANAGER);
    for kind in [Kind::Recipient, Kind::Mailing] {
        for owner in [OWNER, MANAGER] {
            let resource = Resource::owned(kind, owner);
            assert!(can_access(&manager, &resource, Action::View));
            for action in [Action::Update, Action::Delete, Action::Dispatch] {
                assert!(!can_access(&manager, &resource, action), "{kind:?} {action:?}");
            }
        }
        assert!(!can_access(&manager, &Resource::new(kind), Action::Create));
        assert_eq!(list_scope(&manager, kind).unwrap(), ListScope::All);
    }
}

#[test]
fn manager_may_disable_any_mailing() {
    let manager = Actor::manager(MANAGER);
    assert!(can_access(
        &manager,
        &Resource::owned(Kind::Mailing, OWNER),
        Action::Moderate
    ));
    assert!(!can_access(
        &manager,
        &Resource::owned(Kind::Recipient, OWNER),
        Action::Moderate
    ));
}

#[test]
fn manager_messages_are_private() {
    let manager = Actor::manager(MANAGER);
    assert!(!can_access(
        &manager,
        &Resource::owned(Kind::Message, OWNER),
        Action::View
    ));
    assert!(can_access(
        &manager,
        &Resource::owned(Kind::Message, MANAGER),
        Action::Update
    ));
    assert_eq!(
        list_scope(&manager, Kind::Message).unwrap(),
        ListScope::OwnedBy(MANAGER)
    );
}

#[test]
fn only_managers_moderate_users_and_never_themselves() {
    let manager = Actor::manager(MANAGER);
    assert!(can_access(&manager, &Resource::owned(Kind::User, OWNER), Action::Moderate));
    assert!(!can_access(&manager, &Resource::owned(Kind::User, MANAGER), Action::Moderate));
    assert!(!can_access(
        &Actor::user(OTHER),
        &Resource::owned(Kind::User, OWNER),
        Action::Moderate
    ));
    assert!(list_scope(&Actor::user(OWNER), Kind::User).is_err());
}

#[test]
fn final_status_follows_counts() {
    assert_eq!(final_status(5, 0, 0), MailingStatus::Completed);
    assert_eq!(final_status(0, 0, 0), MailingStatus::Completed);
    assert_eq!(final_status(2, 1, 0), MailingStatus::PartiallyCompleted);
    assert_eq!(final_status(0, 3, 0), MailingStatus::Failed);
}

#[test]
fn retry_that_only_fails_keeps_earlier_deliveries() {
    assert_eq!(final_status(0, 1, 2), MailingStatus::PartiallyCompleted);
    assert_eq!(final_status(1, 0, 2), MailingStatus::Completed);
}

#[test]
fn dispatchable_statuses() {
    assert!(MailingStatus::Created.is_dispatchable());
    assert!(MailingStatus::PartiallyCompleted.is_dispatchable());
    assert!(!MailingStatus::Running.is_dispatchable());
    assert!(!MailingStatus::Completed.is_dispatchable());
    assert!(!MailingStatus::Failed.is_dispatchable());
}

#[test]
fn backoff_doubles_up_to_cap() {
    let policy = RetryPolicy {
        concurrency: 1,
        max_attempts: 10,
        backoff_base: Duration::from_secs(1),
        backoff_cap: Duration::from_secs(5),
    };
    assert_eq!(policy.backoff(1), Duration::from_secs(1));
    assert_eq!(policy.backoff(2), Duration::from_secs(2));
    assert_eq!(policy.backoff(3), Duration::from_secs(4));
    assert_eq!(policy.backoff(4), Duration::from_secs(5));
    assert_eq!(policy.backoff(40), Duration::from_secs(5));
}

#[test]
fn transport_error_renders_kind_and_detail() {
    let e = TransportError::new(TransportErrorKind::Rejected, "550 mailbox unavailable");
    assert_eq!(e.to_string(), "Rejected: 550 mailbox unavailable");
}
