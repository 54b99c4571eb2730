#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{Duration as TimeDelta, Utc};
use entity::{mailing, prelude::*};
use mailing_service::{
    access::Actor,
    db,
    dispatch::DispatchEngine,
    mailings::{self, MailingForm},
    messages::{self, MessageForm},
    recipients::{self, RecipientForm},
    transport::{Email, Transport, TransportError, TransportErrorKind},
    users,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait};
use tracing::Level;

pub const FROM: &str = "noreply@mailing.test";

pub async fn setup() -> DatabaseConnection {
    // Set up logging
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();

    db::connect_and_migrate("sqlite::memory:")
        .await
        .expect("in-memory database")
}

/// Records every address it is asked to send to and fails for the ones
/// listed in `failing`.
#[derive(Default)]
pub struct ScriptedTransport {
    failing: Mutex<HashSet<String>>,
    sent: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn failing_for(addresses: &[&str]) -> Self {
        let transport = Self::default();
        transport.set_failing(addresses);
        transport
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn set_failing(&self, addresses: &[&str]) {
        *self.failing.lock().unwrap() = addresses.iter().map(|a| a.to_string()).collect();
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, email: &Email<'_>) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(email.to.to_string());
        if self.failing.lock().unwrap().contains(email.to) {
            return Err(TransportError::new(
                TransportErrorKind::Rejected,
                format!("550 5.1.1 <{}>: mailbox unavailable", email.to),
            ));
        }
        Ok(())
    }
}

pub fn engine(db: &DatabaseConnection, transport: Arc<ScriptedTransport>) -> DispatchEngine {
    DispatchEngine::new(db.clone(), transport, FROM)
}

pub async fn user(db: &DatabaseConnection, name: &str) -> Actor {
    let user = users::create_user(db, name, &format!("{name}@users.test"))
        .await
        .unwrap();
    Actor::user(user.id)
}

pub async fn manager(db: &DatabaseConnection, name: &str) -> Actor {
    let user = users::create_user(db, name, &format!("{name}@users.test"))
        .await
        .unwrap();
    users::set_manager(db, user.id, true).await.unwrap();
    users::load_actor(db, user.id).await.unwrap()
}

pub async fn recipient(db: &DatabaseConnection, actor: &Actor, email: &str) -> i32 {
    recipients::create(
        db,
        actor,
        &RecipientForm {
            email: email.to_string(),
            full_name: email.split('@').next().unwrap().to_string(),
            comment: None,
        },
    )
    .await
    .unwrap()
    .id
}

pub async fn message(db: &DatabaseConnection, actor: &Actor) -> i32 {
    messages::create(
        db,
        actor,
        &MessageForm {
            subject: "Spring newsletter".to_string(),
            body: "Hello from the mailing list.".to_string(),
        },
    )
    .await
    .unwrap()
    .id
}

/// A form whose window is open now.
pub fn open_window(message_id: i32, recipient_ids: Vec<i32>) -> MailingForm {
    let now = Utc::now();
    MailingForm {
        start_time: now - TimeDelta::hours(1),
        end_time: now + TimeDelta::hours(1),
        message_id,
        recipient_ids,
    }
}

/// Creates a message, recipients for `emails` and an open mailing binding them.
pub async fn mailing_to(db: &DatabaseConnection, actor: &Actor, emails: &[&str]) -> i32 {
    let message_id = message(db, actor).await;
    let mut recipient_ids = Vec::new();
    for email in emails {
        recipient_ids.push(recipient(db, actor, email).await);
    }
    mailings::create(db, actor, &open_window(message_id, recipient_ids))
        .await
        .unwrap()
        .id
}

pub async fn reload(db: &DatabaseConnection, mailing_id: i32) -> mailing::Model {
    Mailing::find_by_id(mailing_id)
        .one(db)
        .await
        .unwrap()
        .expect("mailing exists")
}

/// Makes every attempt insert for `email` fail the way a broken database
/// would, while the send itself still goes out.
pub async fn reject_attempts_for(db: &DatabaseConnection, email: &str) {
    db.execute_unprepared(&format!(
        "CREATE TRIGGER reject_attempts BEFORE INSERT ON mailing_attempt \
         WHEN NEW.recipient_id = (SELECT id FROM recipient WHERE email = '{email}') \
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END"
    ))
    .await
    .unwrap();
}
