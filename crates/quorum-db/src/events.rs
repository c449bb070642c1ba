use crate::{DbError, DbPool};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Open,
    Closed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RsvpResponse {
    Going,
    Maybe,
    NotGoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    TwentyFourHour,
    OneHour,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub max_attendees: Option<i64>,
    pub creator_id: String,
    pub channel_id: String,
    pub message_ref: Option<String>,
    pub status: EventStatus,
    pub reminder_24h_sent: bool,
    pub reminder_1h_sent: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RsvpRow {
    pub event_id: i64,
    pub user_id: String,
    pub response: RsvpResponse,
    pub responded_at: DateTime<Utc>,
}

/// Three-way RSVP tally, zero-filled for responses with no rows.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RsvpCounts {
    pub going: i64,
    pub maybe: i64,
    pub not_going: i64,
}

const EVENT_COLUMNS: &str = "id, title, description, location, starts_at, max_attendees, \
     creator_id, channel_id, message_ref, status, reminder_24h_sent, reminder_1h_sent, created_at";

#[allow(clippy::too_many_arguments)]
pub async fn create_event(
    pool: &DbPool,
    title: &str,
    description: Option<&str>,
    location: Option<&str>,
    starts_at: DateTime<Utc>,
    max_attendees: Option<i64>,
    creator_id: &str,
    channel_id: &str,
) -> Result<i64, DbError> {
    let event_id: i64 = sqlx::query_scalar(
        "INSERT INTO events (title, description, location, starts_at, max_attendees,
                             creator_id, channel_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         RETURNING id",
    )
    .bind(title)
    .bind(description)
    .bind(location)
    .bind(starts_at)
    .bind(max_attendees)
    .bind(creator_id)
    .bind(channel_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(event_id)
}

/// Set-once chat message handle, same contract as polls::set_message_ref.
pub async fn set_message_ref(
    pool: &DbPool,
    event_id: i64,
    message_ref: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE events SET message_ref = ?2 WHERE id = ?1 AND message_ref IS NULL",
    )
    .bind(event_id)
    .bind(message_ref)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_event(pool: &DbPool, event_id: i64) -> Result<Option<EventRow>, DbError> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"
    ))
    .bind(event_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Upsert by (event, user): re-responding overwrites response and
/// timestamp, last write wins. At most one row per pair.
///
/// The attendee cap is enforced inside the same statement as the write:
/// a "going" response only lands while the other users' going count is
/// below `cap`, so concurrent responders cannot overfill the event.
/// Returns false when the guard rejects the write.
pub async fn set_rsvp(
    pool: &DbPool,
    event_id: i64,
    user_id: &str,
    response: RsvpResponse,
    cap: Option<i64>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO rsvps (event_id, user_id, response, responded_at)
         SELECT ?1, ?2, ?3, ?4
         WHERE ?5 IS NULL
            OR ?3 <> 'going'
            OR (SELECT COUNT(*) FROM rsvps
                WHERE event_id = ?1 AND response = 'going' AND user_id <> ?2) < ?5
         ON CONFLICT (event_id, user_id)
         DO UPDATE SET response = excluded.response, responded_at = excluded.responded_at",
    )
    .bind(event_id)
    .bind(user_id)
    .bind(response)
    .bind(Utc::now())
    .bind(cap)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_user_rsvp(
    pool: &DbPool,
    event_id: i64,
    user_id: &str,
) -> Result<Option<RsvpResponse>, DbError> {
    let response: Option<RsvpResponse> =
        sqlx::query_scalar("SELECT response FROM rsvps WHERE event_id = ?1 AND user_id = ?2")
            .bind(event_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(response)
}

pub async fn get_rsvp_counts(pool: &DbPool, event_id: i64) -> Result<RsvpCounts, DbError> {
    let rows: Vec<(RsvpResponse, i64)> = sqlx::query_as(
        "SELECT response, COUNT(*) FROM rsvps WHERE event_id = ?1 GROUP BY response",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await?;

    let mut counts = RsvpCounts::default();
    for (response, count) in rows {
        match response {
            RsvpResponse::Going => counts.going = count,
            RsvpResponse::Maybe => counts.maybe = count,
            RsvpResponse::NotGoing => counts.not_going = count,
        }
    }
    Ok(counts)
}

pub async fn get_rsvp_users(
    pool: &DbPool,
    event_id: i64,
    response: RsvpResponse,
) -> Result<Vec<String>, DbError> {
    let users: Vec<String> = sqlx::query_scalar(
        "SELECT user_id FROM rsvps
         WHERE event_id = ?1 AND response = ?2
         ORDER BY responded_at",
    )
    .bind(event_id)
    .bind(response)
    .fetch_all(pool)
    .await?;
    Ok(users)
}

/// The open -> closed edge; conditional, one winner under races.
pub async fn close_event(pool: &DbPool, event_id: i64) -> Result<bool, DbError> {
    let result =
        sqlx::query("UPDATE events SET status = 'closed' WHERE id = ?1 AND status = 'open'")
            .bind(event_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// The open -> cancelled edge; a closed event cannot be cancelled.
pub async fn cancel_event(pool: &DbPool, event_id: i64) -> Result<bool, DbError> {
    let result =
        sqlx::query("UPDATE events SET status = 'cancelled' WHERE id = ?1 AND status = 'open'")
            .bind(event_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Open future events inside the 24-hour window with at least one
/// reminder flag unset. The engine decides which reminder is due.
pub async fn get_events_needing_reminder(
    pool: &DbPool,
    now: DateTime<Utc>,
) -> Result<Vec<EventRow>, DbError> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE status = 'open'
           AND starts_at > ?1
           AND starts_at <= ?2
           AND (reminder_24h_sent = 0 OR reminder_1h_sent = 0)
         ORDER BY starts_at"
    ))
    .bind(now)
    .bind(now + Duration::hours(24))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Flags are monotonic: this only ever flips false -> true.
pub async fn mark_reminder_sent(
    pool: &DbPool,
    event_id: i64,
    kind: ReminderKind,
) -> Result<(), DbError> {
    let query = match kind {
        ReminderKind::TwentyFourHour => "UPDATE events SET reminder_24h_sent = 1 WHERE id = ?1",
        ReminderKind::OneHour => "UPDATE events SET reminder_1h_sent = 1 WHERE id = ?1",
    };
    sqlx::query(query).bind(event_id).execute(pool).await?;
    Ok(())
}

/// Open events whose start time has passed; consumed by the auto-close sweep.
pub async fn get_past_open_events(
    pool: &DbPool,
    now: DateTime<Utc>,
) -> Result<Vec<EventRow>, DbError> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE status = 'open' AND starts_at <= ?1
         ORDER BY starts_at"
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_upcoming_events(
    pool: &DbPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<EventRow>, DbError> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE status = 'open' AND starts_at > ?1
         ORDER BY starts_at
         LIMIT ?2"
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> DbPool {
        let pool = crate::create_pool("sqlite::memory:", 1).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn make_event(pool: &DbPool, title: &str, starts_at: DateTime<Utc>) -> i64 {
        create_event(pool, title, None, None, starts_at, None, "U1", "C1")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_and_get_event() {
        let pool = test_pool().await;
        let starts = Utc::now() + Duration::days(2);
        let id = create_event(
            &pool,
            "Journal Club",
            Some("Monthly paper review"),
            Some("Room 4"),
            starts,
            Some(12),
            "U1",
            "C1",
        )
        .await
        .unwrap();

        let event = get_event(&pool, id).await.unwrap().unwrap();
        assert_eq!(event.title, "Journal Club");
        assert_eq!(event.max_attendees, Some(12));
        assert_eq!(event.status, EventStatus::Open);
        assert!(!event.reminder_24h_sent);
        assert!(!event.reminder_1h_sent);
        assert!(get_event(&pool, id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rsvp_upsert_overwrites_response_and_timestamp() {
        let pool = test_pool().await;
        let id = make_event(&pool, "ev", Utc::now() + Duration::days(1)).await;

        assert!(set_rsvp(&pool, id, "U2", RsvpResponse::Going, None).await.unwrap());
        let first: RsvpRow = sqlx::query_as(
            "SELECT event_id, user_id, response, responded_at FROM rsvps WHERE event_id = ?1",
        )
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();

        assert!(set_rsvp(&pool, id, "U2", RsvpResponse::Maybe, None).await.unwrap());
        let second: RsvpRow = sqlx::query_as(
            "SELECT event_id, user_id, response, responded_at FROM rsvps WHERE event_id = ?1",
        )
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(second.response, RsvpResponse::Maybe);
        assert!(second.responded_at >= first.responded_at);

        // Still exactly one row per (event, user).
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rsvps WHERE event_id = ?1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(
            get_user_rsvp(&pool, id, "U2").await.unwrap(),
            Some(RsvpResponse::Maybe)
        );
    }

    #[tokio::test]
    async fn rsvp_counts_are_zero_filled() {
        let pool = test_pool().await;
        let id = make_event(&pool, "ev", Utc::now() + Duration::days(1)).await;

        let counts = get_rsvp_counts(&pool, id).await.unwrap();
        assert_eq!(counts.going, 0);
        assert_eq!(counts.maybe, 0);
        assert_eq!(counts.not_going, 0);

        set_rsvp(&pool, id, "U2", RsvpResponse::Going, None).await.unwrap();
        set_rsvp(&pool, id, "U3", RsvpResponse::Going, None).await.unwrap();
        set_rsvp(&pool, id, "U4", RsvpResponse::NotGoing, None).await.unwrap();

        let counts = get_rsvp_counts(&pool, id).await.unwrap();
        assert_eq!(counts.going, 2);
        assert_eq!(counts.maybe, 0);
        assert_eq!(counts.not_going, 1);

        let going = get_rsvp_users(&pool, id, RsvpResponse::Going).await.unwrap();
        assert_eq!(going, vec!["U2".to_string(), "U3".to_string()]);
    }

    #[tokio::test]
    async fn going_cap_is_enforced_by_the_write_itself() {
        let pool = test_pool().await;
        let id = make_event(&pool, "ev", Utc::now() + Duration::days(1)).await;

        // Two writes whose guards see the same starting state: only the
        // first lands once the cap is reached, no matter what the caller
        // read beforehand.
        assert!(set_rsvp(&pool, id, "U2", RsvpResponse::Going, Some(1)).await.unwrap());
        assert!(!set_rsvp(&pool, id, "U3", RsvpResponse::Going, Some(1)).await.unwrap());
        assert_eq!(get_rsvp_counts(&pool, id).await.unwrap().going, 1);
        assert_eq!(get_user_rsvp(&pool, id, "U3").await.unwrap(), None);

        // Only other users' rows gate the guard, never the writer's own.
        assert!(set_rsvp(&pool, id, "U2", RsvpResponse::Going, Some(1)).await.unwrap());
        // Non-going responses are never capacity-limited.
        assert!(set_rsvp(&pool, id, "U3", RsvpResponse::Maybe, Some(1)).await.unwrap());

        // Stepping down frees the slot for the blocked user.
        assert!(set_rsvp(&pool, id, "U2", RsvpResponse::NotGoing, Some(1)).await.unwrap());
        assert!(set_rsvp(&pool, id, "U3", RsvpResponse::Going, Some(1)).await.unwrap());
        assert_eq!(get_rsvp_counts(&pool, id).await.unwrap().going, 1);
    }

    #[tokio::test]
    async fn message_ref_is_set_once() {
        let pool = test_pool().await;
        let id = make_event(&pool, "ev", Utc::now() + Duration::days(1)).await;

        assert!(set_message_ref(&pool, id, "1700000000.0001").await.unwrap());
        assert!(!set_message_ref(&pool, id, "1700000000.0002").await.unwrap());
        let event = get_event(&pool, id).await.unwrap().unwrap();
        assert_eq!(event.message_ref.as_deref(), Some("1700000000.0001"));
    }

    #[tokio::test]
    async fn close_and_cancel_are_mutually_exclusive() {
        let pool = test_pool().await;
        let a = make_event(&pool, "a", Utc::now() + Duration::days(1)).await;
        let b = make_event(&pool, "b", Utc::now() + Duration::days(1)).await;

        assert!(close_event(&pool, a).await.unwrap());
        assert!(!close_event(&pool, a).await.unwrap());
        assert!(!cancel_event(&pool, a).await.unwrap());

        assert!(cancel_event(&pool, b).await.unwrap());
        assert!(!close_event(&pool, b).await.unwrap());
        assert_eq!(
            get_event(&pool, b).await.unwrap().unwrap().status,
            EventStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn reminder_query_excludes_past_distant_and_fully_reminded() {
        let pool = test_pool().await;
        let now = Utc::now();

        let soon = make_event(&pool, "soon", now + Duration::minutes(50)).await;
        let tomorrow = make_event(&pool, "tomorrow", now + Duration::hours(23)).await;
        let distant = make_event(&pool, "distant", now + Duration::days(3)).await;
        let past = make_event(&pool, "past", now - Duration::hours(1)).await;
        let done = make_event(&pool, "done", now + Duration::minutes(30)).await;
        mark_reminder_sent(&pool, done, ReminderKind::TwentyFourHour).await.unwrap();
        mark_reminder_sent(&pool, done, ReminderKind::OneHour).await.unwrap();

        let due = get_events_needing_reminder(&pool, now).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|e| e.id).collect();
        assert!(ids.contains(&soon));
        assert!(ids.contains(&tomorrow));
        assert!(!ids.contains(&distant));
        assert!(!ids.contains(&past));
        assert!(!ids.contains(&done));
    }

    #[tokio::test]
    async fn past_open_events_and_upcoming_listing() {
        let pool = test_pool().await;
        let now = Utc::now();

        let past = make_event(&pool, "past", now - Duration::minutes(10)).await;
        let future_near = make_event(&pool, "near", now + Duration::hours(2)).await;
        let future_far = make_event(&pool, "far", now + Duration::days(5)).await;

        let stale = get_past_open_events(&pool, now).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, past);

        close_event(&pool, past).await.unwrap();
        assert!(get_past_open_events(&pool, now).await.unwrap().is_empty());

        let upcoming = get_upcoming_events(&pool, now, 10).await.unwrap();
        let ids: Vec<i64> = upcoming.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![future_near, future_far]);

        let limited = get_upcoming_events(&pool, now, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, future_near);
    }
}
