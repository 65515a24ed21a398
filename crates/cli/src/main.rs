mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use tattle_core::config::{load_dotenv, LedgerConfig, SmtpConfig, TemplateConfig};
use tattle_core::{Clock, ExceptionEvent, NotifierConfig, RequestInfo, SystemClock, TomlConfig};
use tattle_ledger::{day_key, DuplicateLedger, FsBlobStore};
use tattle_notify::email::SmtpTransport;
use tattle_notify::formatter::HtmlFormatter;
use tattle_notify::Notifier;

use crate::cli::{CaptureArgs, CliArgs, Command, LedgerCommand};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();
    let config = load_config(&args.config);

    match args.command {
        Command::Test => {
            let notifier = build_notifier(config)?;
            notifier
                .send_test()
                .await
                .context("test notification failed")?;
            println!("test notification sent");
        }
        Command::Capture(capture) => {
            let propagate = capture.propagate;
            let event = event_from_args(capture);
            let notifier = build_notifier(config)?;
            let outcome = notifier.capture_exception(&event, propagate).await?;
            println!("{}", outcome.as_str());
        }
        Command::Ledger(LedgerCommand::Days) => {
            let ledger = open_ledger(&config)?;
            for day in ledger.days()? {
                println!("{day}");
            }
        }
        Command::Ledger(LedgerCommand::Show { day }) => {
            let ledger = open_ledger(&config)?;
            let day = day.unwrap_or_else(|| day_key(SystemClock.today()));
            for fingerprint in ledger.entries(&day)? {
                println!("{fingerprint}");
            }
        }
    }

    Ok(())
}

/// Read the config file, falling back to defaults, then apply `TATTLE_*`
/// overrides.
fn load_config(path: &str) -> TomlConfig {
    let mut config = match TomlConfig::from_file(path) {
        Ok(cfg) => {
            info!(path, "loaded tattle config");
            cfg
        }
        Err(e) => {
            warn!(
                error = %e,
                path,
                "failed to load config, using defaults and environment"
            );
            TomlConfig::empty()
        }
    };
    config.apply_env_overrides();
    config
}

fn open_ledger(config: &TomlConfig) -> Result<DuplicateLedger> {
    let ledger_config = LedgerConfig::from_provider(config)?;
    let store = FsBlobStore::new(&ledger_config.dir).with_context(|| {
        format!("failed to open ledger at {}", ledger_config.dir.display())
    })?;
    Ok(DuplicateLedger::new(Arc::new(store), ledger_config.lock_timeout))
}

fn build_notifier(config: TomlConfig) -> Result<Notifier> {
    NotifierConfig::from_provider(&config)?.log_summary();

    let ledger = open_ledger(&config)?;
    let transport = SmtpTransport::from_config(&SmtpConfig::from_provider(&config)?)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let formatter = HtmlFormatter::from_config(&TemplateConfig::from_provider(&config)?)?
        .with_clock(Arc::clone(&clock));

    Ok(
        Notifier::builder(Arc::new(config), Arc::new(ledger), Arc::new(transport))
            .formatter(Arc::new(formatter))
            .clock(clock)
            .build(),
    )
}

fn event_from_args(args: CaptureArgs) -> ExceptionEvent {
    let event = ExceptionEvent::new(args.kind, args.message, args.file, args.line)
        .with_trace(args.trace);

    if args.user_agent.is_none() && args.url.is_none() && args.method.is_none() {
        return event;
    }
    event.with_request(RequestInfo {
        user_agent: args.user_agent,
        url: args.url,
        method: args.method,
    })
}
