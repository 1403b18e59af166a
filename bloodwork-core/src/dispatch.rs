//! Best-effort mail delivery of the finished report.
//!
//! A [`MailTransport`] opens a [`MailSession`]; the dispatcher authenticates,
//! sends, and then closes the session on every path once `open` has succeeded.
//! Delivery failures are logged and reported as [`DispatchResult::Failed`],
//! never raised.

use crate::config::EmailConfig;
use crate::error::{ConfigError, DeliveryError};
use crate::types::{Address, DispatchResult, RecommendationReport};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A fully addressed plain-text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Address,
    pub subject: String,
    pub body: String,
}

/// Opens sessions to a delivery service.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn open(&self) -> Result<Box<dyn MailSession>, DeliveryError>;
}

/// One open connection to a delivery service.
#[async_trait]
pub trait MailSession: Send {
    async fn authenticate(&mut self) -> Result<(), DeliveryError>;

    /// Send `mail`, returning the server's response summary.
    async fn send(&mut self, mail: &OutgoingMail) -> Result<String, DeliveryError>;

    /// Release the session. Must be safe to call after any failure.
    async fn close(&mut self);
}

/// SMTP with STARTTLS and password credentials, via lettre.
pub struct SmtpTransport {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
}

impl SmtpTransport {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            timeout,
        }
    }

    /// Build a transport from config, resolving the password up front.
    pub fn from_config(config: &EmailConfig) -> Result<Self, ConfigError> {
        let password = config.resolve_password()?;
        Ok(Self::new(
            config.smtp_host.clone(),
            config.smtp_port,
            config.login(),
            password,
            Duration::from_secs(config.timeout_secs),
        ))
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn open(&self) -> Result<Box<dyn MailSession>, DeliveryError> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(|e| DeliveryError::Connect {
                message: format!("SMTP relay error: {e}"),
            })?
            .port(self.port)
            .credentials(Credentials::new(
                self.username.clone(),
                self.password.clone(),
            ))
            .timeout(Some(self.timeout))
            .build();

        debug!(host = %self.host, port = self.port, "Opened SMTP session");
        Ok(Box::new(SmtpSession {
            mailer: Some(mailer),
        }))
    }
}

struct SmtpSession {
    mailer: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpSession {
    fn mailer(&self) -> Result<&AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        self.mailer.as_ref().ok_or(DeliveryError::SessionClosed)
    }
}

#[async_trait]
impl MailSession for SmtpSession {
    async fn authenticate(&mut self) -> Result<(), DeliveryError> {
        // Connecting runs STARTTLS and AUTH with the configured credentials.
        match self.mailer()?.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DeliveryError::AuthFailed {
                message: "server rejected the connection check".to_string(),
            }),
            Err(e) if e.is_permanent() => Err(DeliveryError::AuthFailed {
                message: e.to_string(),
            }),
            Err(e) => Err(DeliveryError::Connect {
                message: e.to_string(),
            }),
        }
    }

    async fn send(&mut self, mail: &OutgoingMail) -> Result<String, DeliveryError> {
        let message = build_message(mail)?;
        let response = self
            .mailer()?
            .send(message)
            .await
            .map_err(|e| DeliveryError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(response.code().to_string())
    }

    async fn close(&mut self) {
        if self.mailer.take().is_some() {
            debug!("Closed SMTP session");
        }
    }
}

fn build_message(mail: &OutgoingMail) -> Result<lettre::Message, DeliveryError> {
    let from: Mailbox = mail.from.parse().map_err(|e| DeliveryError::InvalidAddress {
        address: mail.from.clone(),
        reason: format!("{e}"),
    })?;
    let to: Mailbox = mail
        .to
        .as_str()
        .parse()
        .map_err(|e| DeliveryError::InvalidAddress {
            address: mail.to.to_string(),
            reason: format!("{e}"),
        })?;
    lettre::Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject.as_str())
        .body(mail.body.clone())
        .map_err(|e| DeliveryError::Build {
            message: e.to_string(),
        })
}

/// Hands reports to a mail transport.
pub struct Dispatcher {
    transport: Option<Arc<dyn MailTransport>>,
    sender: String,
    subject: String,
    disabled_reason: String,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        sender: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            transport: Some(transport),
            sender: sender.into(),
            subject: subject.into(),
            disabled_reason: String::new(),
        }
    }

    /// A dispatcher that skips every delivery with `reason`.
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self {
            transport: None,
            sender: String::new(),
            subject: String::new(),
            disabled_reason: reason.into(),
        }
    }

    /// Build from config. Missing sender or credentials disable delivery.
    pub fn from_config(config: &EmailConfig) -> Self {
        if !config.enabled {
            return Self::disabled("email delivery is disabled");
        }
        if config.from_address.trim().is_empty() {
            return Self::disabled("no sender address configured");
        }
        match SmtpTransport::from_config(config) {
            Ok(transport) => Self::new(
                Arc::new(transport),
                config.from_address.clone(),
                config.subject.clone(),
            ),
            Err(e) => {
                warn!(error = %e, "SMTP credentials unavailable; delivery disabled");
                Self::disabled(format!("SMTP credentials unavailable: {e}"))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Mail the rendered report to `destination`.
    pub async fn dispatch(
        &self,
        report: &RecommendationReport,
        destination: &Address,
    ) -> DispatchResult {
        let Some(transport) = &self.transport else {
            info!(reason = %self.disabled_reason, "Skipping delivery");
            return DispatchResult::Skipped {
                reason: self.disabled_reason.clone(),
            };
        };

        let mail = OutgoingMail {
            from: self.sender.clone(),
            to: destination.clone(),
            subject: self.subject.clone(),
            body: report.render(),
        };

        let mut session = match transport.open().await {
            Ok(session) => session,
            Err(e) => {
                warn!(to = %destination, error = %e, "Failed to open mail session");
                return DispatchResult::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let outcome = authenticate_and_send(session.as_mut(), &mail).await;
        session.close().await;

        match outcome {
            Ok(response) => {
                info!(to = %destination, response = %response, "Report delivered");
                DispatchResult::Delivered { response }
            }
            Err(e) => {
                warn!(to = %destination, error = %e, "Report delivery failed");
                DispatchResult::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

async fn authenticate_and_send(
    session: &mut dyn MailSession,
    mail: &OutgoingMail,
) -> Result<String, DeliveryError> {
    session.authenticate().await?;
    session.send(mail).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HealthIssue;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<String>>,
        sent: Mutex<Vec<OutgoingMail>>,
    }

    impl Journal {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Failure {
        None,
        Open,
        Auth,
        Send,
    }

    struct FakeTransport {
        journal: Arc<Journal>,
        failure: Failure,
    }

    struct FakeSession {
        journal: Arc<Journal>,
        failure: Failure,
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn open(&self) -> Result<Box<dyn MailSession>, DeliveryError> {
            self.journal.events.lock().unwrap().push("open".into());
            if self.failure == Failure::Open {
                return Err(DeliveryError::Connect {
                    message: "connection refused".into(),
                });
            }
            Ok(Box::new(FakeSession {
                journal: self.journal.clone(),
                failure: self.failure,
            }))
        }
    }

    #[async_trait]
    impl MailSession for FakeSession {
        async fn authenticate(&mut self) -> Result<(), DeliveryError> {
            self.journal.events.lock().unwrap().push("auth".into());
            if self.failure == Failure::Auth {
                return Err(DeliveryError::AuthFailed {
                    message: "535 5.7.8 Username and Password not accepted".into(),
                });
            }
            Ok(())
        }

        async fn send(&mut self, mail: &OutgoingMail) -> Result<String, DeliveryError> {
            self.journal.events.lock().unwrap().push("send".into());
            if self.failure == Failure::Send {
                return Err(DeliveryError::SendFailed {
                    message: "552 message too large".into(),
                });
            }
            self.journal.sent.lock().unwrap().push(mail.clone());
            Ok("250".into())
        }

        async fn close(&mut self) {
            self.journal.events.lock().unwrap().push("close".into());
        }
    }

    fn dispatcher(failure: Failure) -> (Dispatcher, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let transport = FakeTransport {
            journal: journal.clone(),
            failure,
        };
        let dispatcher = Dispatcher::new(
            Arc::new(transport),
            "reports@example.com",
            "Personalized Health Recommendations",
        );
        (dispatcher, journal)
    }

    fn report() -> RecommendationReport {
        RecommendationReport::assemble(
            vec![HealthIssue::new("Anemia")],
            vec!["Eat leafy greens".into()],
            vec!["https://e.com/anemia".into()],
            6,
            4,
        )
    }

    fn destination() -> Address {
        Address::parse("owner@example.com").unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_delivered() {
        let (dispatcher, journal) = dispatcher(Failure::None);
        let result = dispatcher.dispatch(&report(), &destination()).await;
        assert_eq!(
            result,
            DispatchResult::Delivered {
                response: "250".into()
            }
        );
        assert_eq!(journal.events(), vec!["open", "auth", "send", "close"]);

        let sent = journal.sent.lock().unwrap();
        assert_eq!(sent[0].from, "reports@example.com");
        assert_eq!(sent[0].to.as_str(), "owner@example.com");
        assert_eq!(sent[0].subject, "Personalized Health Recommendations");
        assert_eq!(sent[0].body, report().render());
    }

    #[tokio::test]
    async fn test_auth_failure_still_closes() {
        let (dispatcher, journal) = dispatcher(Failure::Auth);
        let result = dispatcher.dispatch(&report(), &destination()).await;
        assert!(matches!(result, DispatchResult::Failed { ref reason } if reason.contains("535")));
        assert_eq!(journal.events(), vec!["open", "auth", "close"]);
    }

    #[tokio::test]
    async fn test_send_failure_still_closes() {
        let (dispatcher, journal) = dispatcher(Failure::Send);
        let result = dispatcher.dispatch(&report(), &destination()).await;
        assert!(matches!(result, DispatchResult::Failed { .. }));
        assert_eq!(journal.events(), vec!["open", "auth", "send", "close"]);
    }

    #[tokio::test]
    async fn test_open_failure_has_nothing_to_close() {
        let (dispatcher, journal) = dispatcher(Failure::Open);
        let result = dispatcher.dispatch(&report(), &destination()).await;
        assert!(matches!(result, DispatchResult::Failed { .. }));
        assert_eq!(journal.events(), vec!["open"]);
    }

    #[tokio::test]
    async fn test_disabled_dispatcher_skips() {
        let dispatcher = Dispatcher::from_config(&EmailConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!dispatcher.is_enabled());
        let result = dispatcher.dispatch(&report(), &destination()).await;
        assert!(matches!(result, DispatchResult::Skipped { .. }));
    }

    #[test]
    fn test_from_config_without_sender_is_disabled() {
        let dispatcher = Dispatcher::from_config(&EmailConfig::default());
        assert!(!dispatcher.is_enabled());
    }

    #[test]
    fn test_from_config_with_inline_password() {
        let dispatcher = Dispatcher::from_config(&EmailConfig {
            from_address: "reports@example.com".into(),
            password: Some("app-password".into()),
            ..Default::default()
        });
        assert!(dispatcher.is_enabled());
    }

    #[test]
    fn test_build_message_rejects_bad_sender() {
        let mail = OutgoingMail {
            from: "not an address".into(),
            to: destination(),
            subject: "s".into(),
            body: "b".into(),
        };
        assert!(matches!(
            build_message(&mail),
            Err(DeliveryError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_smtp_session_rejects_use_after_close() {
        let transport = SmtpTransport::new(
            "smtp.example.com",
            587,
            "user",
            "pass",
            Duration::from_secs(1),
        );
        let mut session = transport.open().await.unwrap();
        session.close().await;
        let mail = OutgoingMail {
            from: "reports@example.com".into(),
            to: destination(),
            subject: "s".into(),
            body: "b".into(),
        };
        assert!(matches!(
            session.send(&mail).await,
            Err(DeliveryError::SessionClosed)
        ));
    }
}
