//! RSVP business rules, reminder eligibility, and event transitions.

use crate::error::CoreError;
use crate::surface::{ChatSurface, EventView, Notification};
use chrono::{DateTime, Duration, Utc};
use quorum_db::events::{self, EventRow, EventStatus, ReminderKind, RsvpResponse};
use quorum_db::DbPool;

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub max_attendees: Option<i64>,
    pub creator_id: String,
    pub channel_id: String,
}

impl NewEvent {
    fn validate(&self) -> Result<(), CoreError> {
        if self.title.trim().is_empty() {
            return Err(CoreError::validation("title", "title must not be empty"));
        }
        if let Some(max) = self.max_attendees {
            if max < 1 {
                return Err(CoreError::validation(
                    "max_attendees",
                    "attendee cap must be a positive number",
                ));
            }
        }
        Ok(())
    }
}

pub async fn create_event(pool: &DbPool, new_event: &NewEvent) -> Result<EventView, CoreError> {
    new_event.validate()?;
    let event_id = events::create_event(
        pool,
        new_event.title.trim(),
        new_event.description.as_deref().map(str::trim).filter(|d| !d.is_empty()),
        new_event.location.as_deref().map(str::trim).filter(|l| !l.is_empty()),
        new_event.starts_at,
        new_event.max_attendees,
        &new_event.creator_id,
        &new_event.channel_id,
    )
    .await?;
    load_event_view(pool, event_id).await
}

pub async fn load_event_view(pool: &DbPool, event_id: i64) -> Result<EventView, CoreError> {
    let event = events::get_event(pool, event_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    let counts = events::get_rsvp_counts(pool, event_id).await?;
    let going = events::get_rsvp_users(pool, event_id, RsvpResponse::Going).await?;
    let maybe = events::get_rsvp_users(pool, event_id, RsvpResponse::Maybe).await?;
    let not_going = events::get_rsvp_users(pool, event_id, RsvpResponse::NotGoing).await?;
    Ok(EventView {
        event,
        counts,
        going,
        maybe,
        not_going,
    })
}

/// Record a user's RSVP, last write wins.
///
/// Re-submitting the currently held response is a deliberate no-op (there
/// is no withdraw path). The attendee cap only gates users *moving onto*
/// "going", and it is enforced inside the store write itself, so two
/// concurrent responders racing for the last slot cannot both land.
pub async fn record_rsvp(
    pool: &DbPool,
    event_id: i64,
    user_id: &str,
    response: RsvpResponse,
) -> Result<EventView, CoreError> {
    let event = events::get_event(pool, event_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    if event.status != EventStatus::Open {
        return Err(CoreError::Conflict(
            "event is no longer accepting RSVPs".to_string(),
        ));
    }

    let current = events::get_user_rsvp(pool, event_id, user_id).await?;
    if current == Some(response) {
        return load_event_view(pool, event_id).await;
    }

    if !events::set_rsvp(pool, event_id, user_id, response, event.max_attendees).await? {
        return Err(CoreError::Conflict("event is full".to_string()));
    }
    load_event_view(pool, event_id).await
}

/// Creator-requested open -> closed.
pub async fn close_event(pool: &DbPool, event_id: i64, actor: &str) -> Result<EventView, CoreError> {
    let event = events::get_event(pool, event_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    if event.creator_id != actor {
        return Err(CoreError::Forbidden);
    }
    if !events::close_event(pool, event_id).await? {
        return Err(CoreError::Conflict("event is not open".to_string()));
    }
    load_event_view(pool, event_id).await
}

/// Creator-requested open -> cancelled.
pub async fn cancel_event(
    pool: &DbPool,
    event_id: i64,
    actor: &str,
) -> Result<EventView, CoreError> {
    let event = events::get_event(pool, event_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    if event.creator_id != actor {
        return Err(CoreError::Forbidden);
    }
    if !events::cancel_event(pool, event_id).await? {
        return Err(CoreError::Conflict("event is not open".to_string()));
    }
    load_event_view(pool, event_id).await
}

/// Which reminder, if any, is due for this event right now. The 1-hour
/// window outranks the 24-hour one, so at most one reminder kind fires
/// per sweep iteration even under clock skew.
pub fn due_reminder(event: &EventRow, now: DateTime<Utc>) -> Option<ReminderKind> {
    if event.starts_at <= now {
        return None;
    }
    let remaining = event.starts_at - now;
    if !event.reminder_1h_sent && remaining <= Duration::hours(1) {
        Some(ReminderKind::OneHour)
    } else if !event.reminder_24h_sent && remaining <= Duration::hours(24) {
        Some(ReminderKind::TwentyFourHour)
    } else {
        None
    }
}

/// Notify going + maybe responders of events entering a reminder window.
/// Per-recipient delivery failure is logged and skipped; the flag is set
/// after the attempt so a reminder fires at most once.
pub async fn sweep_event_reminders<S: ChatSurface>(
    pool: &DbPool,
    surface: &S,
    now: DateTime<Utc>,
) -> Result<usize, CoreError> {
    let due = events::get_events_needing_reminder(pool, now).await?;
    let mut sent = 0;
    for event in due {
        let Some(kind) = due_reminder(&event, now) else {
            continue;
        };
        if let Err(e) = remind_event(pool, surface, &event, kind).await {
            tracing::error!(event_id = event.id, error = %e, "reminder processing failed");
            continue;
        }
        sent += 1;
    }
    Ok(sent)
}

async fn remind_event<S: ChatSurface>(
    pool: &DbPool,
    surface: &S,
    event: &EventRow,
    kind: ReminderKind,
) -> Result<(), CoreError> {
    let lead = match kind {
        ReminderKind::TwentyFourHour => "tomorrow",
        ReminderKind::OneHour => "in about an hour",
    };
    let mut body = format!("{} starts {} ({})", event.title, lead, event.starts_at);
    if let Some(location) = &event.location {
        body.push_str(&format!(" at {location}"));
    }
    let note = Notification {
        title: format!("Reminder: {}", event.title),
        body,
    };

    // not_going responders are never notified.
    let going = events::get_rsvp_users(pool, event.id, RsvpResponse::Going).await?;
    let maybe = events::get_rsvp_users(pool, event.id, RsvpResponse::Maybe).await?;
    let mut delivered = 0usize;
    for user_id in going.iter().chain(maybe.iter()) {
        if let Err(e) = surface.notify_user(user_id, &note).await {
            tracing::warn!(event_id = event.id, user_id, error = %e, "reminder delivery failed");
        } else {
            delivered += 1;
        }
    }

    events::mark_reminder_sent(pool, event.id, kind).await?;
    tracing::info!(
        event_id = event.id,
        ?kind,
        delivered,
        "sent event reminder"
    );
    Ok(())
}

/// Auto-close open events whose start time has passed; re-render only
/// events this sweep transitioned.
pub async fn sweep_past_events<S: ChatSurface>(
    pool: &DbPool,
    surface: &S,
    now: DateTime<Utc>,
) -> Result<usize, CoreError> {
    let past = events::get_past_open_events(pool, now).await?;
    let mut closed = 0;
    for event in past {
        match events::close_event(pool, event.id).await {
            Ok(true) => {
                closed += 1;
                tracing::info!(event_id = event.id, "auto-closed past event");
                match load_event_view(pool, event.id).await {
                    Ok(view) => {
                        if let Err(e) = surface.render_event(&view).await {
                            tracing::warn!(event_id = event.id, error = %e, "event re-render failed");
                        }
                    }
                    Err(e) => {
                        tracing::error!(event_id = event.id, error = %e, "failed to load closed event")
                    }
                }
            }
            Ok(false) => {}
            Err(e) => tracing::error!(event_id = event.id, error = %e, "failed to close event"),
        }
    }
    Ok(closed)
}
