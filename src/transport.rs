//! Outbound mail transport.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tracing::debug;

use crate::settings::{Smtp, SmtpTls};

/// Recorded as the server response of every successful attempt.
pub const SUCCESS_RESPONSE: &str = "200 OK";

/// One outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Email<'a> {
    pub subject: &'a str,
    pub body: &'a str,
    pub from: &'a str,
    pub to: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    InvalidAddress,
    Build,
    Connection,
    Timeout,
    Rejected,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::InvalidAddress => "InvalidAddress",
            TransportErrorKind::Build => "Build",
            TransportErrorKind::Connection => "Connection",
            TransportErrorKind::Timeout => "Timeout",
            TransportErrorKind::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

/// Displays as `"<kind>: <detail>"`, the form stored on failed attempts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub detail: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<lettre::transport::smtp::Error> for TransportError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_permanent() || e.is_transient() {
            TransportErrorKind::Rejected
        } else {
            TransportErrorKind::Connection
        };
        TransportError::new(kind, e.to_string())
    }
}

/// Sends one message to one address.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, email: &Email<'_>) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, email: &Email<'_>) -> Result<(), TransportError> {
        (**self).send(email).await
    }
}

/// SMTP relay transport.
#[derive(Clone)]
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn from_settings(smtp: &Smtp) -> Result<Self, TransportError> {
        let builder = match smtp.tls {
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host),
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?,
            SmtpTls::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?,
        };

        let mut builder = builder
            .port(smtp.port)
            .timeout(Some(Duration::from_secs(smtp.timeout_seconds)));

        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }

    fn build_message(email: &Email<'_>) -> Result<Message, TransportError> {
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|_| TransportError::new(TransportErrorKind::InvalidAddress, email.from))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|_| TransportError::new(TransportErrorKind::InvalidAddress, email.to))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.to_string())
            .map_err(|e| TransportError::new(TransportErrorKind::Build, e.to_string()))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, email: &Email<'_>) -> Result<(), TransportError> {
        let message = Self::build_message(email)?;
        let response = self.transport.send(message).await?;
        debug!(to = email.to, code = %response.code(), "relay accepted message");
        Ok(())
    }
}
