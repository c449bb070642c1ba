//! Timer-driven reconciliation: each sweep is its own independently
//! scheduled task calling a pure engine function with the current
//! instant. Overlap with user actions (or a slow previous run) is safe
//! because every transition is a conditional update that only one caller
//! can win.

use crate::onboarding::{self, OnboardingPolicy, RegistrationSource, WelcomeMailer};
use crate::surface::ChatSurface;
use crate::{event, poll};
use chrono::Utc;
use quorum_db::DbPool;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone)]
pub struct SweepIntervals {
    pub poll_expiry: Duration,
    pub event_reminders: Duration,
    pub past_events: Duration,
    pub registrations: Duration,
}

impl Default for SweepIntervals {
    fn default() -> Self {
        Self {
            poll_expiry: Duration::from_secs(60),
            event_reminders: Duration::from_secs(5 * 60),
            past_events: Duration::from_secs(10 * 60),
            registrations: Duration::from_secs(60 * 60),
        }
    }
}

fn ticker(every: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

pub async fn poll_expiry_loop<S: ChatSurface>(pool: DbPool, surface: S, every: Duration) {
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        match poll::sweep_expired_polls(&pool, &surface, Utc::now()).await {
            Ok(0) => {}
            Ok(closed) => tracing::info!(closed, "poll expiry sweep finished"),
            Err(e) => tracing::error!(error = %e, "poll expiry sweep failed"),
        }
    }
}

pub async fn event_reminder_loop<S: ChatSurface>(pool: DbPool, surface: S, every: Duration) {
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        match event::sweep_event_reminders(&pool, &surface, Utc::now()).await {
            Ok(0) => {}
            Ok(sent) => tracing::info!(sent, "reminder sweep finished"),
            Err(e) => tracing::error!(error = %e, "reminder sweep failed"),
        }
    }
}

pub async fn past_event_loop<S: ChatSurface>(pool: DbPool, surface: S, every: Duration) {
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        match event::sweep_past_events(&pool, &surface, Utc::now()).await {
            Ok(0) => {}
            Ok(closed) => tracing::info!(closed, "past event sweep finished"),
            Err(e) => tracing::error!(error = %e, "past event sweep failed"),
        }
    }
}

pub async fn registration_loop<Src, M>(
    pool: DbPool,
    source: Src,
    mailer: M,
    policy: OnboardingPolicy,
    every: Duration,
) where
    Src: RegistrationSource,
    M: WelcomeMailer,
{
    let mut interval = ticker(every);
    loop {
        interval.tick().await;
        match onboarding::process_registrations(&pool, &source, &mailer, &policy).await {
            Ok(0) => {}
            Ok(imported) => tracing::info!(imported, "registration sweep finished"),
            Err(e) => tracing::error!(error = %e, "registration sweep failed"),
        }
    }
}
