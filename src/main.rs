use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Parser};

use bulk_mailer::config::{self, FailurePolicy, MailerConfig, RenderPolicy, RetryConfig};
use bulk_mailer::dispatch::{DispatchEngine, DispatchObserver, DispatchReport, Progress, SmtpTransport};
use bulk_mailer::error::{ConfigError, Error, InputError};
use bulk_mailer::pipeline::{Mailer, prepare};
use bulk_mailer::preview::PreviewWriter;
use bulk_mailer::records::{address, load_records};
use bulk_mailer::render::{HandlebarsTemplate, MessageRenderer};

/// Send HTML email over SMTP to a JSON list of recipients
#[derive(Parser, Debug)]
#[command(name = "bulk-mailer", version, long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["test", "list"])))]
struct Cli {
    /// Send a single test email to this address
    #[arg(long, value_name = "EMAIL")]
    test: Option<String>,

    /// JSON file with contacts (each object may carry an 'email' key)
    #[arg(long, value_name = "JSON_FILE")]
    list: Option<PathBuf>,

    /// Override the subject (SUBJECT)
    #[arg(long)]
    subject: Option<String>,

    /// Override the From display name (FROM_NAME)
    #[arg(long)]
    from_name: Option<String>,

    /// Override the Reply-To address (REPLY_TO)
    #[arg(long)]
    reply_to: Option<String>,

    /// Messages per minute (RATE_PER_MIN)
    #[arg(long, value_name = "PER_MINUTE")]
    rate: Option<String>,

    /// Do everything except connect and send
    #[arg(long)]
    dry_run: bool,

    /// Write each rendered HTML body to this directory
    #[arg(long, value_name = "DIR")]
    save_previews: Option<PathBuf>,

    /// Debug logging and a load report
    #[arg(short, long)]
    verbose: bool,

    /// Retry transient send failures, then keep going (SEND_FAILURE_POLICY=continue)
    #[arg(long)]
    continue_on_error: bool,

    /// Render lazily and skip records whose template fails instead of aborting
    #[arg(long)]
    isolate_render_errors: bool,
}

/// Prints per-message progress lines.
struct Console;

impl DispatchObserver for Console {
    fn on_sent(&mut self, progress: &Progress<'_>) {
        println!(
            "[OK] {}/{} -> {}",
            progress.position, progress.total, progress.recipient
        );
    }

    fn on_failed(&mut self, progress: &Progress<'_>, reason: &str) {
        eprintln!(
            "[FAILED] {}/{} -> {}: {reason}",
            progress.position, progress.total, progress.recipient
        );
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32, Error> {
    let mut config = MailerConfig::from_env()?;
    apply_overrides(&mut config, &cli)?;

    let render_policy = if cli.isolate_render_errors {
        RenderPolicy::Isolate
    } else {
        RenderPolicy::Abort
    };

    let template = HandlebarsTemplate::from_file(&config.template_path)?;
    let renderer = MessageRenderer::new(
        Arc::new(template),
        config.context_schema.clone(),
        config.sender.clone(),
        config.reply_to.clone(),
    );
    let transport = Arc::new(SmtpTransport::new(config.smtp.clone()));
    let engine = DispatchEngine::new(
        transport,
        config.rate_per_minute,
        config.failure_policy.clone(),
    );
    let previews = cli
        .save_previews
        .as_ref()
        .map(PreviewWriter::create)
        .transpose()?;
    let mailer = Mailer::new(renderer, engine, render_policy, previews);

    tracing::debug!(
        host = %config.smtp.host,
        port = config.smtp.port,
        template = %config.template_path.display(),
        dry_run = cli.dry_run,
        "Mailer configured"
    );

    let report = match (&cli.test, &cli.list) {
        (Some(raw), _) => {
            let recipient =
                address::validate(raw).map_err(|_| InputError::InvalidRecipient(raw.clone()))?;
            mailer
                .send_test(&recipient, &config.subject, cli.dry_run, &mut Console)
                .await?
        }
        (None, Some(path)) => {
            let records = load_records(path)?;
            let batch = prepare(records);
            if cli.verbose {
                println!("[INFO] {}", batch.summary.load_line());
            }
            println!("[SUMMARY] {}.", batch.summary);
            mailer
                .send_batch(&batch, &config.subject, cli.dry_run, &mut Console)
                .await?
        }
        (None, None) => {
            return Err(ConfigError::MissingRequired {
                key: "--test or --list".into(),
                hint: "Pass one of them".into(),
            }
            .into());
        }
    };

    Ok(finish(&report))
}

/// CLI flags take precedence over the environment.
fn apply_overrides(config: &mut MailerConfig, cli: &Cli) -> Result<(), ConfigError> {
    if let Some(subject) = &cli.subject {
        config.subject = subject.clone();
    }
    if let Some(name) = &cli.from_name {
        config.sender.name = name.clone();
    }
    if let Some(raw) = &cli.reply_to {
        config.reply_to = Some(config::parse_address("--reply-to", raw)?);
    }
    if let Some(raw) = &cli.rate {
        config.rate_per_minute = Some(config::parse_rate("--rate", raw)?);
    }
    if cli.continue_on_error && config.failure_policy == FailurePolicy::Abort {
        config.failure_policy = FailurePolicy::Continue(RetryConfig::default());
    }
    Ok(())
}

fn finish(report: &DispatchReport) -> i32 {
    if report.dry_run {
        println!(
            "[DRY-RUN] Would send {} message(s). No SMTP connection will be made.",
            report.skipped()
        );
    }
    if report.failed() > 0 {
        println!(
            "[DONE] {} sent; {} failed of {} message(s).",
            report.sent(),
            report.failed(),
            report.total
        );
        return 3;
    }
    0
}

fn report_error(error: &Error) {
    match error {
        Error::Config(e) => eprintln!("[CONFIG ERROR] {e}"),
        Error::Input(e) => eprintln!("[ERROR] {e}"),
        Error::Render(e) => eprintln!("[RENDER ERROR] {e}"),
        Error::RenderFailed(e) => eprintln!("[RENDER ERROR] {e}"),
        Error::Dispatch(e) => eprintln!("[SEND ERROR] {e}"),
        Error::Aborted(e) => {
            eprintln!("[SEND ERROR] {}", e.error);
            eprintln!(
                "[SEND ERROR] {} of {} message(s) sent before the run stopped.",
                e.report.sent(),
                e.report.total
            );
        }
    }
}
