//! SMTP mail transport via `lettre` with TLS support.
//!
//! Sends the rendered exception report as an HTML email. Supports STARTTLS,
//! implicit TLS (port 465) and plaintext relays.

use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tattle_core::config::{keys, SmtpConfig};
use tattle_core::ConfigError;

use crate::error::CaptureError;
use crate::traits::MailTransport;

/// Delivers exception reports through an SMTP relay.
#[derive(Debug)]
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpTransport {
    /// Build a transport from `[smtp]` settings.
    ///
    /// Port defaults to 587. Port 465 uses implicit TLS; otherwise STARTTLS
    /// is used unless `tls = false`.
    ///
    /// SMTP credentials are resolved from the `SMTP_USERNAME` and `SMTP_PASSWORD`
    /// environment variables. If both are set, they are passed to the transport;
    /// otherwise the connection is unauthenticated.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, CaptureError> {
        let from = parse_mailbox(&config.from, keys::SMTP_FROM)?;
        let host = config.host.as_str();
        let port = config.port.unwrap_or(587);
        let use_tls = config.tls.unwrap_or(true);

        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| CaptureError::Transport(e.to_string()))?
                .port(port)
        } else if use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| CaptureError::Transport(e.to_string()))?
                .port(port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port)
        };

        if let (Ok(username), Ok(password)) =
            (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD"))
        {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

fn parse_mailbox(addr: &str, key: &str) -> Result<Mailbox, CaptureError> {
    addr.parse().map_err(|_: lettre::address::AddressError| {
        CaptureError::Config(ConfigError::Invalid {
            key: key.to_string(),
            expected: "email address",
        })
    })
}

#[async_trait::async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), CaptureError> {
        if recipients.is_empty() {
            return Err(ConfigError::Missing(keys::RECIPIENTS.to_string()).into());
        }

        let mut message_builder = Message::builder().from(self.from.clone());
        for recipient in recipients {
            message_builder = message_builder.to(parse_mailbox(recipient, keys::RECIPIENTS)?);
        }

        let email = message_builder
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| CaptureError::Transport(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| CaptureError::Transport(e.to_string()))?;

        tracing::info!(
            channel = "smtp",
            subject = %subject,
            recipients = recipients.len(),
            "exception report delivered"
        );

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "smtp"
    }
}
