//! Outbound notifications (welcome mail, password reset codes).
//!
//! Delivery is always detached from the request path: [`dispatch`] spawns a
//! task and a failed send is logged, never surfaced to the caller.

use std::{fmt, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::config::SmtpConfig;

#[derive(Clone, PartialEq, Eq)]
pub enum Notification {
    Welcome {
        email: String,
        name: String,
    },
    PasswordReset {
        email: String,
        token: String,
        expires_at: OffsetDateTime,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Notification::Welcome { email, .. } | Notification::PasswordReset { email, .. } => {
                email
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Welcome { .. } => "welcome",
            Notification::PasswordReset { .. } => "password_reset",
        }
    }
}

// The reset token must never reach a log line.
impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("kind", &self.kind())
            .field("recipient", &self.recipient())
            .finish()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// Delivers notifications as plain-text mail through an SMTP relay.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let from: Mailbox = config.from.parse().context("invalid SMTP_FROM address")?;
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .context("failed to create SMTP relay")?
        } else {
            // Plain connection, e.g. Mailpit during development
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let builder = builder.port(config.port);
        let transport = if config.username.is_empty() {
            builder.build()
        } else {
            builder
                .credentials(Credentials::new(
                    config.username.clone(),
                    config.password.clone(),
                ))
                .build()
        };

        Ok(Self { transport, from })
    }

    fn render(&self, notification: &Notification) -> anyhow::Result<Message> {
        let (subject, body) = match notification {
            Notification::Welcome { name, .. } => (
                "Welcome to userdesk",
                format!("Hi {name},\n\nYour account is ready. You can sign in with this address.\n"),
            ),
            Notification::PasswordReset {
                token, expires_at, ..
            } => (
                "Reset your userdesk password",
                format!(
                    "Someone asked to reset the password for this account.\n\n\
                     Reset code: {token}\n\n\
                     The code can be used once and expires at {}.\n\
                     If this wasn't you, ignore this message.\n",
                    expires_at.format(&Rfc3339)?
                ),
            ),
        };

        let to: Mailbox = notification
            .recipient()
            .parse()
            .context("invalid recipient address")?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .context("failed to build message")
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let message = self.render(notification)?;
        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        info!(
            kind = notification.kind(),
            recipient = notification.recipient(),
            "notification delivered"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

/// Development fallback used when no SMTP relay is configured. Nothing
/// leaves the process.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        warn!(
            kind = notification.kind(),
            recipient = notification.recipient(),
            "notification NOT delivered: no SMTP relay configured"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Captures notifications in memory; optionally fails every send.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    should_fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            should_fail: true,
        }
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn last_to(&self, email: &str) -> Option<Notification> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|n| n.recipient() == email)
            .cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        if self.should_fail {
            anyhow::bail!("recording notifier configured to fail");
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Fire-and-forget delivery. The handle is returned for callers that want
/// to await completion (tests); request handlers drop it.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) -> JoinHandle<()> {
    tokio::spawn(async move {
        match notifier.send(&notification).await {
            Ok(()) => debug!(
                notifier = notifier.name(),
                kind = notification.kind(),
                "notification sent"
            ),
            Err(e) => warn!(
                notifier = notifier.name(),
                kind = notification.kind(),
                recipient = notification.recipient(),
                error = %e,
                "notification failed; continuing"
            ),
        }
    })
}
