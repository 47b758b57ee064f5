use std::time::Duration;

use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use log::{debug, info};

use crate::{config::MailSettings, errors::BootMailError, utils::html_escape};

pub const FAILURE_SUBJECT: &str = "[BOOT] Failure report";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Plain,
    Html,
}

impl From<BodyKind> for ContentType {
    fn from(value: BodyKind) -> Self {
        match value {
            BodyKind::Plain => ContentType::TEXT_PLAIN,
            BodyKind::Html => ContentType::TEXT_HTML,
        }
    }
}

pub trait Mailer {
    /// Sends to `recipient`, or the default recipient when `None`
    fn send(
        &self,
        subject: &str,
        body: &str,
        recipient: Option<&str>,
        kind: BodyKind,
    ) -> Result<(), BootMailError>;

    fn send_failure_report(&self, err: &anyhow::Error) -> Result<(), BootMailError> {
        self.send(
            FAILURE_SUBJECT,
            &render_failure_report(err),
            None,
            BodyKind::Html,
        )
    }
}

/// HTML page with the error kind, its message and the full cause chain
pub fn render_failure_report(err: &anyhow::Error) -> String {
    let kind = BootMailError::find_in(err)
        .map(BootMailError::kind)
        .unwrap_or("Error");
    format!(
        "<h1>Failure Report</h1>\n\
         <p><strong>Type:</strong> {}</p>\n\
         <p><strong>Message:</strong> {}</p>\n\
         <p><strong>Trace:</strong></p>\n\
         <pre>{}</pre>\n",
        kind,
        html_escape(&err.to_string()),
        html_escape(&format!("{err:?}")),
    )
}

/// Sends through an authenticated STARTTLS submission server. A connection is
/// opened per message and dropped when the send returns.
pub struct EmailClient {
    server: String,
    port: u16,
    timeout: Duration,
    login: String,
    password: String,
    default_recipient: Option<String>,
}

impl std::fmt::Debug for EmailClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailClient")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("default_recipient", &self.default_recipient)
            .finish()
    }
}

impl EmailClient {
    pub fn new(server: String, port: u16, timeout: Duration, settings: MailSettings) -> Self {
        let MailSettings {
            login,
            password,
            recipient,
        } = settings;
        Self {
            server,
            port,
            timeout,
            login,
            password,
            default_recipient: Some(recipient),
        }
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    fn build_message(
        &self,
        subject: &str,
        body: &str,
        recipient: &str,
        kind: BodyKind,
    ) -> Result<Message, BootMailError> {
        let from: Mailbox = self
            .login
            .parse()
            .map_err(|e| BootMailError::Configuration(format!("invalid sender {:?}: {e}", self.login)))?;
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| BootMailError::Configuration(format!("invalid recipient {recipient:?}: {e}")))?;
        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::from(kind))
            .body(body.to_string())
            .map_err(|e| BootMailError::Delivery(format!("failed to build message: {e}")))
    }

    fn transport(&self) -> Result<SmtpTransport, BootMailError> {
        let transport = SmtpTransport::starttls_relay(&self.server)
            .map_err(|e| BootMailError::Delivery(format!("failed to set up transport to {}: {e}", self.server)))?
            .port(self.port)
            .credentials(Credentials::new(self.login.clone(), self.password.clone()))
            .timeout(Some(self.timeout))
            .build();
        Ok(transport)
    }
}

impl Mailer for EmailClient {
    fn send(
        &self,
        subject: &str,
        body: &str,
        recipient: Option<&str>,
        kind: BodyKind,
    ) -> Result<(), BootMailError> {
        let recipient = resolve_recipient(recipient, self.default_recipient.as_deref())?;
        let message = self.build_message(subject, body, recipient, kind)?;
        debug!("Sending {kind:?} email {subject:?} to {recipient}");
        let transport = self.transport()?;
        transport
            .send(&message)
            .map_err(|e| BootMailError::Delivery(format!("failed to send {subject:?} to {recipient}: {e}")))?;
        info!("Email sent successfully to {recipient}");
        Ok(())
    }
}

fn resolve_recipient<'a>(
    explicit: Option<&'a str>,
    default: Option<&'a str>,
) -> Result<&'a str, BootMailError> {
    explicit.or(default).ok_or_else(|| {
        BootMailError::Configuration("recipient email must be specified".to_string())
    })
}
