//! SMTP transport over lettre's blocking client connection.
//!
//! One connection per session, reused for every message. Blocking socket
//! calls run on the blocking pool; the connection is moved in and back out.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::{SmtpConfig, TlsMode};
use crate::dispatch::{Session, Transport};
use crate::error::DispatchError;
use crate::render::RenderedMessage;

const HELO_NAME: &str = "localhost";

/// Opens authenticated SMTP sessions from [`SmtpConfig`].
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn open(&self) -> Result<Box<dyn Session>, DispatchError> {
        let config = self.config.clone();
        let connection = connect_blocking(config.clone()).await?;
        info!(host = %config.host, port = config.port, "SMTP session established");
        Ok(Box::new(SmtpSession {
            config,
            connection: Some(connection),
            closed: false,
        }))
    }
}

/// A live SMTP session.
///
/// If the server drops the connection mid-run, the failing delivery reports a
/// per-message error and the next delivery reconnects.
pub struct SmtpSession {
    config: SmtpConfig,
    connection: Option<SmtpConnection>,
    closed: bool,
}

#[async_trait]
impl Session for SmtpSession {
    async fn deliver(&mut self, message: &RenderedMessage) -> Result<(), DispatchError> {
        if self.closed {
            return Err(DispatchError::SessionClosed);
        }
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                debug!(host = %self.config.host, "Reconnecting SMTP session");
                connect_blocking(self.config.clone()).await?
            }
        };

        let email = message.email();
        let envelope = email.envelope().clone();
        let bytes = email.formatted();
        let recipient = message.recipient().to_string();

        let (connection, result) = tokio::task::spawn_blocking(move || {
            let result = connection.send(&envelope, &bytes);
            (connection, result)
        })
        .await
        .map_err(|e| DispatchError::Disconnected {
            reason: format!("send task failed: {e}"),
        })?;

        match result {
            Ok(response) => {
                debug!(
                    recipient = %recipient,
                    code = %response.code(),
                    "SMTP server accepted message"
                );
                self.connection = Some(connection);
                Ok(())
            }
            Err(e) => {
                let error = classify_send_error(&self.config, recipient, &e);
                if connection.has_broken() {
                    debug!(error = %e, "SMTP connection broken, dropping it");
                } else {
                    self.connection = Some(connection);
                }
                Err(error)
            }
        }
    }

    async fn close(mut self: Box<Self>) -> Result<(), DispatchError> {
        self.closed = true;
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || connection.quit().map(|_| ()))
            .await
            .map_err(|e| DispatchError::Disconnected {
                reason: format!("quit task failed: {e}"),
            })?
            .map_err(|e| DispatchError::Disconnected {
                reason: e.to_string(),
            })
    }
}

async fn connect_blocking(config: SmtpConfig) -> Result<SmtpConnection, DispatchError> {
    let host = config.host.clone();
    let port = config.port;
    tokio::task::spawn_blocking(move || connect(&config))
        .await
        .map_err(|e| DispatchError::Connect {
            host,
            port,
            reason: format!("connect task failed: {e}"),
        })?
}

/// Connect, secure and authenticate (blocking, run in spawn_blocking).
fn connect(config: &SmtpConfig) -> Result<SmtpConnection, DispatchError> {
    let connect_error = |reason: String| DispatchError::Connect {
        host: config.host.clone(),
        port: config.port,
        reason,
    };

    let hello = ClientId::Domain(HELO_NAME.to_string());
    let tls = TlsParameters::new(config.host.clone())
        .map_err(|e| connect_error(format!("TLS setup failed: {e}")))?;
    let server = (config.host.as_str(), config.port);

    let mut connection = match config.tls {
        TlsMode::Implicit => {
            SmtpConnection::connect(server, Some(config.timeout), &hello, Some(&tls), None)
                .map_err(|e| connect_error(e.to_string()))?
        }
        TlsMode::StartTls => {
            let mut connection =
                SmtpConnection::connect(server, Some(config.timeout), &hello, None, None)
                    .map_err(|e| connect_error(e.to_string()))?;
            connection
                .starttls(&tls, &hello)
                .map_err(|e| connect_error(format!("STARTTLS failed: {e}")))?;
            connection
        }
    };

    let credentials = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );
    connection
        .auth(&[Mechanism::Plain, Mechanism::Login], &credentials)
        .map_err(|e| DispatchError::AuthFailed {
            username: config.username.clone(),
            reason: e.to_string(),
        })?;

    Ok(connection)
}

fn classify_send_error(
    config: &SmtpConfig,
    recipient: String,
    error: &lettre::transport::smtp::Error,
) -> DispatchError {
    if error.is_timeout() {
        DispatchError::Timeout {
            recipient,
            timeout: config.timeout,
        }
    } else if error.is_permanent() {
        DispatchError::Rejected {
            recipient,
            reason: error.to_string(),
        }
    } else {
        DispatchError::SendFailed {
            recipient,
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;
    use crate::config::Sender;
    use crate::records::address;
    use crate::render::{ContextSchema, HandlebarsTemplate, MessageRenderer};

    fn config(port: u16, tls: TlsMode) -> SmtpConfig {
        let _ = rustls::crypto::ring::default_provider().install_default();
        SmtpConfig {
            host: "127.0.0.1".into(),
            port,
            username: "sender@example.com".into(),
            password: SecretString::from("secret".to_string()),
            tls,
            timeout: Duration::from_secs(2),
        }
    }

    /// A local port with nothing listening on it.
    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn message() -> RenderedMessage {
        let template = HandlebarsTemplate::from_source(Path::new("t.html"), "<p>hi</p>").unwrap();
        let renderer = MessageRenderer::new(
            Arc::new(template),
            ContextSchema::default(),
            Sender {
                name: "Sender".into(),
                address: address::validate("sender@example.com").unwrap(),
            },
            None,
        );
        renderer
            .render_test(&address::validate("to@example.com").unwrap(), "s")
            .unwrap()
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        for tls in [TlsMode::Implicit, TlsMode::StartTls] {
            let transport = SmtpTransport::new(config(closed_port(), tls));
            let err = match transport.open().await {
                Ok(_) => panic!("expected connect failure"),
                Err(e) => e,
            };
            assert!(matches!(err, DispatchError::Connect { .. }), "{err}");
            assert!(!err.is_per_message());
        }
    }

    #[tokio::test]
    async fn closed_session_rejects_delivery() {
        let mut session = SmtpSession {
            config: config(closed_port(), TlsMode::Implicit),
            connection: None,
            closed: true,
        };
        let err = session.deliver(&message()).await.unwrap_err();
        assert!(matches!(err, DispatchError::SessionClosed));
    }

    #[tokio::test]
    async fn close_without_connection_is_ok() {
        let session = Box::new(SmtpSession {
            config: config(closed_port(), TlsMode::Implicit),
            connection: None,
            closed: false,
        });
        assert!(session.close().await.is_ok());
    }

    #[tokio::test]
    async fn reconnect_failure_surfaces_as_connect_error() {
        let mut session = SmtpSession {
            config: config(closed_port(), TlsMode::StartTls),
            connection: None,
            closed: false,
        };
        let err = session.deliver(&message()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Connect { .. }));
    }
}
