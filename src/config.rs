//! Configuration types.
//!
//! Everything is read once at startup via [`MailerConfig::from_env`] and never
//! mutated afterwards. CLI overrides are applied by building a new value.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::records::address::{self, Address};
use crate::render::template::ContextSchema;

const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 465;
const DEFAULT_TEMPLATE_PATH: &str = "email-template.html";
const DEFAULT_SUBJECT: &str = "Professional services";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How the SMTP session is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (SMTPS, usually port 465).
    Implicit,
    /// Plain connect, then upgrade with STARTTLS (usually port 587).
    StartTls,
}

/// What the dispatch engine does when a delivery fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the whole run on the first transport error.
    #[default]
    Abort,
    /// Retry transient errors with backoff, then record the failure and move on.
    Continue(RetryConfig),
}

/// What the pipeline does when a template fails to render for one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderPolicy {
    /// Render everything up front; the first failure aborts before any send.
    #[default]
    Abort,
    /// Render lazily, one message at a time; failures are reported per record.
    Isolate,
}

/// Retry tuning for [`FailurePolicy::Continue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per message, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2,
        }
    }
}

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub tls: TlsMode,
    /// Upper bound for any single network operation.
    pub timeout: Duration,
}

/// Display name + address used in the `From` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub name: String,
    pub address: Address,
}

/// Process-wide mailer configuration.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub smtp: SmtpConfig,
    pub sender: Sender,
    pub subject: String,
    pub template_path: PathBuf,
    pub context_schema: ContextSchema,
    pub reply_to: Option<Address>,
    /// Messages per minute; `None` or `<= 0` means no pacing.
    pub rate_per_minute: Option<f64>,
    pub failure_policy: FailurePolicy,
}

impl MailerConfig {
    /// Build config from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string());
        let port = match var("SMTP_PORT") {
            Some(raw) => parse_value::<u16>("SMTP_PORT", &raw)?,
            None => DEFAULT_SMTP_PORT,
        };

        let username = var("SMTP_USERNAME").ok_or_else(|| ConfigError::MissingRequired {
            key: "SMTP_USERNAME".into(),
            hint: "Set it in the environment or .env".into(),
        })?;
        let password = var("SMTP_PASSWORD").ok_or_else(|| ConfigError::MissingRequired {
            key: "SMTP_PASSWORD".into(),
            hint: "Set it in the environment or .env (use an app password for Gmail)".into(),
        })?;

        let tls = match var("SMTP_USE_SSL") {
            Some(raw) if !is_truthy(&raw) => TlsMode::StartTls,
            _ => TlsMode::Implicit,
        };
        let timeout = match var("SMTP_TIMEOUT_SECS") {
            Some(raw) => match parse_value::<u64>("SMTP_TIMEOUT_SECS", &raw)? {
                0 => {
                    return Err(ConfigError::InvalidValue {
                        key: "SMTP_TIMEOUT_SECS".into(),
                        message: "must be at least 1 second".into(),
                    });
                }
                secs => Duration::from_secs(secs),
            },
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let from_name = var("FROM_NAME").unwrap_or_else(|| username.clone());
        let from_raw = var("FROM_ADDRESS").unwrap_or_else(|| username.clone());
        let from_address = parse_address("FROM_ADDRESS", &from_raw)?;

        let subject = var("SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

        let template_path =
            PathBuf::from(var("TEMPLATE_PATH").unwrap_or_else(|| DEFAULT_TEMPLATE_PATH.to_string()));
        if !template_path.exists() {
            return Err(ConfigError::TemplateNotFound(template_path));
        }

        let context_schema = match var("TEMPLATE_FIELDS") {
            Some(raw) => ContextSchema::from_field_list(&raw),
            None => ContextSchema::default(),
        };

        let reply_to = var("REPLY_TO")
            .map(|raw| parse_address("REPLY_TO", &raw))
            .transpose()?;

        let rate_per_minute = var("RATE_PER_MIN")
            .map(|raw| parse_rate("RATE_PER_MIN", &raw))
            .transpose()?;

        let failure_policy = parse_failure_policy(&var)?;

        Ok(Self {
            smtp: SmtpConfig {
                host,
                port,
                username,
                password: SecretString::from(password),
                tls,
                timeout,
            },
            sender: Sender {
                name: from_name,
                address: from_address,
            },
            subject,
            template_path,
            context_schema,
            reply_to,
            rate_per_minute,
            failure_policy,
        })
    }
}

fn parse_failure_policy<F>(var: &F) -> Result<FailurePolicy, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let policy = var("SEND_FAILURE_POLICY").unwrap_or_else(|| "abort".to_string());
    match policy.trim().to_lowercase().as_str() {
        "abort" => Ok(FailurePolicy::Abort),
        "continue" => {
            let mut retry = RetryConfig::default();
            if let Some(raw) = var("SEND_MAX_ATTEMPTS") {
                retry.max_attempts = parse_value::<u32>("SEND_MAX_ATTEMPTS", &raw)?.max(1);
            }
            if let Some(raw) = var("SEND_RETRY_DELAY_MS") {
                retry.initial_delay =
                    Duration::from_millis(parse_value::<u64>("SEND_RETRY_DELAY_MS", &raw)?);
            }
            if let Some(raw) = var("SEND_RETRY_MAX_DELAY_MS") {
                retry.max_delay =
                    Duration::from_millis(parse_value::<u64>("SEND_RETRY_MAX_DELAY_MS", &raw)?);
            }
            Ok(FailurePolicy::Continue(retry))
        }
        other => Err(ConfigError::InvalidValue {
            key: "SEND_FAILURE_POLICY".into(),
            message: format!("expected 'abort' or 'continue', got '{other}'"),
        }),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.into(),
        message: format!("'{raw}': {e}"),
    })
}

/// Parse a messages-per-minute rate. Must be finite, and a positive rate
/// must give a representable delay.
pub fn parse_rate(key: &str, raw: &str) -> Result<f64, ConfigError> {
    let rate = parse_value::<f64>(key, raw)?;
    if !rate.is_finite() {
        return Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("'{raw}' is not a finite number"),
        });
    }
    if rate > 0.0 && Duration::try_from_secs_f64(60.0 / rate).is_err() {
        return Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("'{raw}' is too small, the delay between messages would overflow"),
        });
    }
    Ok(rate)
}

/// Parse and validate an address-valued setting.
pub fn parse_address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    address::validate(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.into(),
        message: e.to_string(),
    })
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
