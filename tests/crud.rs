mod common;

use std::sync::Arc;

use chrono::Duration as TimeDelta;
use entity::prelude::*;
use mailing_service::{
    access::Actor,
    error::Error,
    mailings,
    messages::{self, MessageForm},
    recipients::{self, RecipientForm},
    users,
};
use sea_orm::{EntityTrait, PaginatorTrait};

use common::ScriptedTransport;

fn form(email: &str) -> RecipientForm {
    RecipientForm {
        email: email.to_string(),
        full_name: "Ann Example".to_string(),
        comment: Some("  met at the fair  ".to_string()),
    }
}

#[tokio::test]
async fn recipient_email_is_unique_across_owners() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let bob = common::user(&db, "bob").await;

    let created = recipients::create(&db, &alice, &form(" Ann@Example.org "))
        .await
        .unwrap();
    assert_eq!(created.email, "ann@example.org");
    assert_eq!(created.comment.as_deref(), Some("met at the fair"));

    let err = recipients::create(&db, &bob, &form("ann@example.org"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err:?}");

    let other = recipients::create(&db, &alice, &form("zed@example.org"))
        .await
        .unwrap();
    let err = recipients::update(&db, &alice, other.id, &form("ann@example.org"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err:?}");
}

#[tokio::test]
async fn recipient_form_is_validated() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;

    let err = recipients::create(&db, &alice, &form("not-an-address"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let mut blank_name = form("ann@example.org");
    blank_name.full_name = "   ".to_string();
    let err = recipients::create(&db, &alice, &blank_name).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn lists_filter_by_owner_except_for_managers() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let bob = common::user(&db, "bob").await;
    let carol = common::manager(&db, "carol").await;
    common::mailing_to(&db, &alice, &["a@example.org"]).await;
    common::mailing_to(&db, &bob, &["b@example.org", "c@example.org"]).await;

    assert_eq!(recipients::list(&db, &alice).await.unwrap().len(), 1);
    assert_eq!(recipients::list(&db, &bob).await.unwrap().len(), 2);
    assert_eq!(recipients::list(&db, &carol).await.unwrap().len(), 3);
    assert_eq!(mailings::list(&db, &alice).await.unwrap().len(), 1);
    assert_eq!(mailings::list(&db, &carol).await.unwrap().len(), 2);
    assert!(messages::list(&db, &carol).await.unwrap().is_empty());
    assert!(matches!(
        recipients::list(&db, &Actor::Anonymous).await,
        Err(Error::PermissionDenied)
    ));
}

#[tokio::test]
async fn foreign_records_are_denied_and_missing_ones_not_found() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let bob = common::user(&db, "bob").await;
    let recipient_id = common::recipient(&db, &alice, "a@example.org").await;
    let message_id = common::message(&db, &alice).await;

    assert!(matches!(
        recipients::get(&db, &bob, recipient_id).await,
        Err(Error::PermissionDenied)
    ));
    assert!(matches!(
        recipients::update(&db, &bob, recipient_id, &form("x@example.org")).await,
        Err(Error::PermissionDenied)
    ));
    assert!(matches!(
        recipients::delete(&db, &bob, recipient_id).await,
        Err(Error::PermissionDenied)
    ));
    assert!(matches!(
        messages::get(&db, &bob, message_id).await,
        Err(Error::PermissionDenied)
    ));
    assert!(matches!(
        recipients::get(&db, &bob, 999).await,
        Err(Error::NotFound { entity: "recipient", key }) if key == "999"
    ));
    assert!(matches!(
        recipients::get(&db, &Actor::Anonymous, recipient_id).await,
        Err(Error::PermissionDenied)
    ));
}

#[tokio::test]
async fn manager_views_but_cannot_edit() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let carol = common::manager(&db, "carol").await;
    let mailing_id = common::mailing_to(&db, &alice, &["a@example.org"]).await;
    let recipient_id = recipients::list(&db, &alice).await.unwrap()[0].id;
    let mailing = mailings::get(&db, &carol, mailing_id).await.unwrap();

    recipients::get(&db, &carol, recipient_id).await.unwrap();
    assert!(matches!(
        recipients::create(&db, &carol, &form("m@example.org")).await,
        Err(Error::PermissionDenied)
    ));
    assert!(matches!(
        recipients::delete(&db, &carol, recipient_id).await,
        Err(Error::PermissionDenied)
    ));
    let edit = common::open_window(mailing.message_id, vec![recipient_id]);
    assert!(matches!(
        mailings::update(&db, &carol, mailing_id, &edit).await,
        Err(Error::PermissionDenied)
    ));
    assert!(matches!(
        mailings::delete(&db, &carol, mailing_id).await,
        Err(Error::PermissionDenied)
    ));
    assert!(matches!(
        mailings::create(&db, &carol, &edit).await,
        Err(Error::PermissionDenied)
    ));

    let disabled = mailings::set_active(&db, &carol, mailing_id, false)
        .await
        .unwrap();
    assert!(!disabled.is_active);
    assert_eq!(disabled.status, MailingStatus::Created);
}

#[tokio::test]
async fn mailing_window_and_ownership_are_validated() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let bob = common::user(&db, "bob").await;
    let message_id = common::message(&db, &alice).await;
    let alice_recipient = common::recipient(&db, &alice, "a@example.org").await;
    let bob_recipient = common::recipient(&db, &bob, "b@example.org").await;

    let mut backwards = common::open_window(message_id, vec![alice_recipient]);
    backwards.end_time = backwards.start_time;
    assert!(matches!(
        mailings::create(&db, &alice, &backwards).await,
        Err(Error::Validation(_))
    ));
    backwards.end_time = backwards.start_time - TimeDelta::minutes(5);
    assert!(matches!(
        mailings::create(&db, &alice, &backwards).await,
        Err(Error::Validation(_))
    ));

    let foreign = common::open_window(message_id, vec![alice_recipient, bob_recipient]);
    assert!(matches!(
        mailings::create(&db, &alice, &foreign).await,
        Err(Error::Validation(_))
    ));
    let not_my_message = common::open_window(message_id, vec![bob_recipient]);
    assert!(matches!(
        mailings::create(&db, &bob, &not_my_message).await,
        Err(Error::Validation(_))
    ));

    let duplicated = common::open_window(message_id, vec![alice_recipient, alice_recipient]);
    let mailing = mailings::create(&db, &alice, &duplicated).await.unwrap();
    assert_eq!(mailing.status, MailingStatus::Created);
    assert_eq!(
        mailings::recipients(&db, &alice, mailing.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn mailing_update_replaces_recipients_and_keeps_status() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let mailing_id = common::mailing_to(&db, &alice, &["a@example.org"]).await;
    let mailing = common::reload(&db, mailing_id).await;
    let b = common::recipient(&db, &alice, "b@example.org").await;
    let c = common::recipient(&db, &alice, "c@example.org").await;

    let updated = mailings::update(
        &db,
        &alice,
        mailing_id,
        &common::open_window(mailing.message_id, vec![c, b]),
    )
    .await
    .unwrap();

    assert_eq!(updated.status, MailingStatus::Created);
    let emails: Vec<_> = mailings::recipients(&db, &alice, mailing_id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.email)
        .collect();
    assert_eq!(emails, ["b@example.org", "c@example.org"]);
}

#[tokio::test]
async fn attempts_are_listed_newest_first_with_stats() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let carol = common::manager(&db, "carol").await;
    let mailing_id =
        common::mailing_to(&db, &alice, &["a@example.org", "b@example.org", "c@example.org"]).await;
    common::engine(&db, Arc::new(ScriptedTransport::failing_for(&["c@example.org"])))
        .dispatch(mailing_id)
        .await
        .unwrap();

    let attempts = mailings::attempts(&db, &carol, mailing_id).await.unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts
        .windows(2)
        .all(|pair| pair[0].attempt_time >= pair[1].attempt_time));
    assert_eq!(attempts[0].status, AttemptStatus::Failed);

    let stats = mailings::attempt_stats(&db, &alice, mailing_id).await.unwrap();
    assert_eq!((stats.total, stats.success, stats.failed), (3, 2, 1));

    let bob = common::user(&db, "bob").await;
    assert!(matches!(
        mailings::attempt_stats(&db, &bob, mailing_id).await,
        Err(Error::PermissionDenied)
    ));
}

#[tokio::test]
async fn deleting_a_mailing_removes_its_attempts() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let mailing_id = common::mailing_to(&db, &alice, &["a@example.org"]).await;
    common::engine(&db, Arc::new(ScriptedTransport::default()))
        .dispatch(mailing_id)
        .await
        .unwrap();

    mailings::delete(&db, &alice, mailing_id).await.unwrap();

    assert_eq!(MailingAttempt::find().count(&db).await.unwrap(), 0);
    assert_eq!(MailingRecipient::find().count(&db).await.unwrap(), 0);
    assert_eq!(Recipient::find().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn deleting_a_message_cascades_to_its_mailings() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let mailing_id = common::mailing_to(&db, &alice, &["a@example.org"]).await;
    let message_id = common::reload(&db, mailing_id).await.message_id;
    common::engine(&db, Arc::new(ScriptedTransport::default()))
        .dispatch(mailing_id)
        .await
        .unwrap();

    messages::delete(&db, &alice, message_id).await.unwrap();

    assert!(Mailing::find_by_id(mailing_id).one(&db).await.unwrap().is_none());
    assert_eq!(MailingAttempt::find().count(&db).await.unwrap(), 0);
    assert!(matches!(
        messages::get(&db, &alice, message_id).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn message_subject_is_required() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let message_id = common::message(&db, &alice).await;

    let blank = MessageForm {
        subject: " ".to_string(),
        body: "body".to_string(),
    };
    assert!(matches!(
        messages::create(&db, &alice, &blank).await,
        Err(Error::Validation(_))
    ));
    let renamed = messages::update(
        &db,
        &alice,
        message_id,
        &MessageForm {
            subject: "Summer newsletter".to_string(),
            body: "New body".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(renamed.subject, "Summer newsletter");
}

#[tokio::test]
async fn managers_block_users_who_then_act_anonymously() {
    let db = common::setup().await;
    let alice = common::user(&db, "alice").await;
    let bob = common::user(&db, "bob").await;
    let carol = common::manager(&db, "carol").await;
    let alice_id = alice.id().unwrap();

    assert!(matches!(
        users::set_active(&db, &bob, alice_id, false).await,
        Err(Error::PermissionDenied)
    ));
    assert!(matches!(
        users::set_active(&db, &carol, carol.id().unwrap(), false).await,
        Err(Error::PermissionDenied)
    ));

    users::set_active(&db, &carol, alice_id, false).await.unwrap();
    assert_eq!(users::load_actor(&db, alice_id).await.unwrap(), Actor::Anonymous);

    users::set_active(&db, &carol, alice_id, true).await.unwrap();
    assert_eq!(users::load_actor(&db, alice_id).await.unwrap(), alice);
    assert_eq!(users::list_users(&db, &carol).await.unwrap().len(), 3);
    assert!(users::list_users(&db, &bob).await.is_err());
}

#[tokio::test]
async fn duplicate_usernames_are_rejected() {
    let db = common::setup().await;
    common::user(&db, "alice").await;

    assert!(matches!(
        users::create_user(&db, "alice", "other@users.test").await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        users::create_user(&db, "alicia", "ALICE@users.test").await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn unknown_username_is_not_found() {
    let db = common::setup().await;
    common::user(&db, "alice").await;

    let err = users::find_by_username(&db, "nobody").await.unwrap_err();

    assert!(matches!(err, Error::NotFound { entity: "user", ref key } if key == "nobody"));
    assert_eq!(err.to_string(), "user nobody not found");
    assert_eq!(
        users::find_by_username(&db, "alice").await.unwrap().username,
        "alice"
    );
}
