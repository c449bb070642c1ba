use anyhow::Result;
use clap::Parser;
use quorum_core::onboarding::OnboardingPolicy;
use quorum_core::sweeper::{self, SweepIntervals};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod stub;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quorum=info")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_db_dir(&config.database.url);

    let db = quorum_db::create_pool(&config.database.url, config.database.max_connections).await?;
    quorum_db::run_migrations(&db).await?;
    tracing::info!(url = %config.database.url, "database ready");

    let surface = stub::TracingSurface;
    let policy = OnboardingPolicy {
        send_email: config.onboarding.send_email,
        send_dm: config.onboarding.send_dm,
        registered_after: config.onboarding.registered_after,
    };
    let intervals = SweepIntervals {
        poll_expiry: Duration::from_secs(config.sweeps.poll_expiry_secs),
        event_reminders: Duration::from_secs(config.sweeps.event_reminders_secs),
        past_events: Duration::from_secs(config.sweeps.past_events_secs),
        registrations: Duration::from_secs(config.sweeps.registrations_secs),
    };

    // Independent timer tasks; each sweep tolerates overlapping with
    // user actions through the store's conditional updates.
    tokio::spawn(sweeper::poll_expiry_loop(
        db.clone(),
        surface.clone(),
        intervals.poll_expiry,
    ));
    tokio::spawn(sweeper::event_reminder_loop(
        db.clone(),
        surface.clone(),
        intervals.event_reminders,
    ));
    tokio::spawn(sweeper::past_event_loop(
        db.clone(),
        surface.clone(),
        intervals.past_events,
    ));
    tokio::spawn(sweeper::registration_loop(
        db.clone(),
        stub::DisconnectedRegistrationSource,
        stub::TracingMailer,
        policy,
        intervals.registrations,
    ));

    tracing::info!("sweepers started (polls, reminders, past events, registrations)");

    tokio::signal::ctrl_c().await?;
    println!();
    tracing::info!("shutting down...");
    db.close().await;
    Ok(())
}

/// Create the database's parent directory before sqlite tries to.
fn ensure_db_dir(database_url: &str) {
    if let Some(db_path) = database_url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!("could not create directory {:?}: {}", parent, e);
                }
            }
        }
    }
}
