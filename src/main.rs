//! classcal - Entry point for the booking sync daemon

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use classcal::config::Settings;
use classcal::extract::BookingExtractor;
use classcal::providers::calendar::GoogleCalendarSink;
use classcal::providers::mail::GmailSource;
use classcal::providers::GoogleSession;
use classcal::services::{PollService, SyncReport, SyncService};
use classcal::storage::{GoogleCredentials, KeychainAccess, SyncStore};

#[derive(Parser)]
#[command(name = "classcal")]
#[command(about = "Create calendar events from fitness class booking confirmations")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Sync state file, overriding the settings
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the mailbox until interrupted
    Run {
        /// Seconds between passes, overriding the settings
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Run a single sync pass
    Once,
    /// Show what has been synchronized so far
    Status,
    /// Store Google OAuth credentials in the system keychain
    Login {
        #[arg(long)]
        client_id: String,

        #[arg(long)]
        client_secret: String,

        #[arg(long)]
        refresh_token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let mut settings = load_settings(&config_path)?;
    if let Some(state) = cli.state {
        settings.sync.state_path = Some(state);
    }

    match cli.command {
        Commands::Run { interval } => {
            if let Some(secs) = interval {
                settings.sync.poll_interval_seconds = secs;
            }
            run(settings).await
        }
        Commands::Once => once(settings).await,
        Commands::Status => status(&settings),
        Commands::Login {
            client_id,
            client_secret,
            refresh_token,
        } => {
            login(
                &settings,
                &config_path,
                GoogleCredentials {
                    client_id,
                    client_secret,
                    refresh_token,
                },
            )
            .await
        }
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    let settings = Settings::load(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Loaded settings");
    Ok(settings)
}

async fn build_service(settings: &Settings) -> Result<SyncService> {
    settings.validate().context("Invalid settings")?;

    let state_path = settings.state_path()?;
    let store = SyncStore::load(&state_path).with_context(|| {
        format!(
            "Refusing to start: sync state at {} is unusable. Fix or move the file aside; \
             starting empty would recreate every event.",
            state_path.display()
        )
    })?;

    let keychain = KeychainAccess::with_service(settings.auth.keychain_service.clone());
    let credentials = keychain
        .google_credentials(&settings.mail.user_id)
        .await
        .context("No Google credentials found. Run `classcal login` first")?;
    let session = Arc::new(GoogleSession::new(credentials));

    let mail = GmailSource::new(Arc::clone(&session), settings.mail.user_id.clone());
    let calendar = GoogleCalendarSink::new(session, settings.calendar.calendar_id.clone())
        .with_default_reminders(settings.calendar.use_default_reminders);
    let extractor = BookingExtractor::new(
        &settings.extractor,
        settings.calendar.event_duration_minutes,
    );

    Ok(SyncService::new(
        settings,
        Arc::new(mail),
        Arc::new(calendar),
        Box::new(extractor),
        store,
    ))
}

async fn run(settings: Settings) -> Result<()> {
    let mut service = build_service(&settings).await?;
    let poll = PollService::new(settings.sync.poll_interval());

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Shutting down after the current pass...");
            signal_cancel.cancel();
        }
    });

    let summary = poll
        .run(&mut service, cancel)
        .await
        .context("Sync stopped")?;
    println!(
        "Stopped after {} passes, {} events created.",
        summary.passes, summary.created
    );
    Ok(())
}

async fn once(settings: Settings) -> Result<()> {
    let mut service = build_service(&settings).await?;
    let report = service.run_once().await.context("Sync pass failed")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.is_empty() {
        println!("No new mails.");
        return;
    }
    for event in &report.created {
        println!(
            "Created {} at {} ({})",
            event.summary,
            event.start_time.format("%Y-%m-%d %H:%M"),
            event.event_id
        );
    }
    println!("{}", report);
}

fn status(settings: &Settings) -> Result<()> {
    let state_path = settings.state_path()?;
    let store = SyncStore::load(&state_path)
        .with_context(|| format!("Failed to read sync state at {}", state_path.display()))?;

    println!("State file: {}", state_path.display());
    println!("Processed:  {}", store.len());
    match store.cursor() {
        Some(cursor) => println!("Cursor:     {}", cursor.to_rfc3339()),
        None => println!("Cursor:     (none, next pass scans the whole mailbox)"),
    }

    let mut records: Vec<_> = store.records().collect();
    records.sort_by_key(|r| std::cmp::Reverse(r.event_start));
    for record in records.iter().take(10) {
        println!(
            "  {}  {}  -> {}",
            record.event_start.format("%Y-%m-%d %H:%M"),
            record.message_id,
            record.event_id
        );
    }

    let dead: Vec<_> = store.dead_letters().collect();
    if !dead.is_empty() {
        println!("Skipped:    {}", dead.len());
        for (id, letter) in dead {
            println!("  {}  {:?}: {}", id, letter.kind, letter.detail);
        }
    }
    Ok(())
}

async fn login(
    settings: &Settings,
    config_path: &Path,
    credentials: GoogleCredentials,
) -> Result<()> {
    let keychain = KeychainAccess::with_service(settings.auth.keychain_service.clone());
    keychain
        .store_google_credentials(&settings.mail.user_id, &credentials)
        .await
        .context("Failed to store credentials in the keychain")?;
    println!(
        "Stored credentials for {} in keychain service {}.",
        settings.mail.user_id,
        keychain.service_name()
    );

    if !config_path.exists() {
        settings.save(config_path)?;
        println!(
            "Wrote default settings to {}. Set mail.sender before running.",
            config_path.display()
        );
    }
    Ok(())
}
