use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PollRow {
    pub id: i64,
    pub question: String,
    pub creator_id: String,
    pub channel_id: String,
    pub message_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub closes_at: Option<DateTime<Utc>>,
    pub status: PollStatus,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PollOptionRow {
    pub id: i64,
    pub poll_id: i64,
    pub option_text: String,
    pub option_order: i64,
}

/// One option's aggregate standing: count always equals `voters.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollOptionResult {
    pub option_id: i64,
    pub option_text: String,
    pub option_order: i64,
    pub vote_count: i64,
    pub voters: Vec<String>,
}

const POLL_COLUMNS: &str =
    "id, question, creator_id, channel_id, message_ref, created_at, closes_at, status";

/// Insert a poll and its options (order 1..N, input order) in one transaction.
pub async fn create_poll(
    pool: &DbPool,
    question: &str,
    creator_id: &str,
    channel_id: &str,
    options: &[String],
    closes_at: Option<DateTime<Utc>>,
) -> Result<i64, DbError> {
    let mut tx = pool.begin().await?;

    let poll_id: i64 = sqlx::query_scalar(
        "INSERT INTO polls (question, creator_id, channel_id, closes_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         RETURNING id",
    )
    .bind(question)
    .bind(creator_id)
    .bind(channel_id)
    .bind(closes_at)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    for (idx, option_text) in options.iter().enumerate() {
        sqlx::query(
            "INSERT INTO poll_options (poll_id, option_text, option_order) VALUES (?1, ?2, ?3)",
        )
        .bind(poll_id)
        .bind(option_text.trim())
        .bind(idx as i64 + 1)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(poll_id)
}

/// Record the chat message handle after first render. Set-once: returns
/// false if a handle is already stored.
pub async fn set_message_ref(
    pool: &DbPool,
    poll_id: i64,
    message_ref: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE polls SET message_ref = ?2 WHERE id = ?1 AND message_ref IS NULL",
    )
    .bind(poll_id)
    .bind(message_ref)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_poll(pool: &DbPool, poll_id: i64) -> Result<Option<PollRow>, DbError> {
    let row = sqlx::query_as::<_, PollRow>(&format!(
        "SELECT {POLL_COLUMNS} FROM polls WHERE id = ?1"
    ))
    .bind(poll_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_poll_options(pool: &DbPool, poll_id: i64) -> Result<Vec<PollOptionRow>, DbError> {
    let rows = sqlx::query_as::<_, PollOptionRow>(
        "SELECT id, poll_id, option_text, option_order
         FROM poll_options
         WHERE poll_id = ?1
         ORDER BY option_order",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Option ids the user currently holds votes on within this poll.
pub async fn get_user_votes(
    pool: &DbPool,
    poll_id: i64,
    user_id: &str,
) -> Result<Vec<i64>, DbError> {
    let rows: Vec<i64> =
        sqlx::query_scalar("SELECT option_id FROM votes WHERE poll_id = ?1 AND user_id = ?2")
            .bind(poll_id)
            .bind(user_id)
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

/// Replace the user's full vote set for a poll: delete-then-reinsert in
/// one transaction. An empty set clears all of the user's votes. Each
/// insert is guarded against option ids from another poll; a foreign id
/// rolls the whole call back.
pub async fn set_user_votes(
    pool: &DbPool,
    poll_id: i64,
    user_id: &str,
    option_ids: &[i64],
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM votes WHERE poll_id = ?1 AND user_id = ?2")
        .bind(poll_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let now = Utc::now();
    for option_id in option_ids {
        let result = sqlx::query(
            "INSERT INTO votes (poll_id, option_id, user_id, voted_at)
             SELECT ?1, ?2, ?3, ?4
             WHERE EXISTS (
                 SELECT 1 FROM poll_options o WHERE o.id = ?2 AND o.poll_id = ?1
             )",
        )
        .bind(poll_id)
        .bind(option_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Per-option counts and voter lists, ordered by option order ascending.
pub async fn get_poll_results(
    pool: &DbPool,
    poll_id: i64,
) -> Result<Vec<PollOptionResult>, DbError> {
    let counted: Vec<(i64, String, i64, i64)> = sqlx::query_as(
        "SELECT o.id, o.option_text, o.option_order, COUNT(v.id)
         FROM poll_options o
         LEFT JOIN votes v ON v.option_id = o.id
         WHERE o.poll_id = ?1
         GROUP BY o.id
         ORDER BY o.option_order",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;

    let voter_rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT option_id, user_id FROM votes WHERE poll_id = ?1 ORDER BY voted_at",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;

    let mut voters_by_option: HashMap<i64, Vec<String>> = HashMap::new();
    for (option_id, user_id) in voter_rows {
        voters_by_option.entry(option_id).or_default().push(user_id);
    }

    let results = counted
        .into_iter()
        .map(|(option_id, option_text, option_order, vote_count)| PollOptionResult {
            option_id,
            option_text,
            option_order,
            vote_count,
            voters: voters_by_option.remove(&option_id).unwrap_or_default(),
        })
        .collect();
    Ok(results)
}

pub async fn count_distinct_voters(pool: &DbPool, poll_id: i64) -> Result<i64, DbError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM votes WHERE poll_id = ?1")
            .bind(poll_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// The open -> closed edge, as an atomic conditional update. Exactly one
/// of any set of concurrent callers observes true; a missing or
/// already-closed poll yields false.
pub async fn close_poll(pool: &DbPool, poll_id: i64) -> Result<bool, DbError> {
    let result = sqlx::query("UPDATE polls SET status = 'closed' WHERE id = ?1 AND status = 'open'")
        .bind(poll_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Open polls whose close time is set and has passed `now`. Consumed by
/// the expiry sweep only.
pub async fn get_expired_polls(
    pool: &DbPool,
    now: DateTime<Utc>,
) -> Result<Vec<PollRow>, DbError> {
    let rows = sqlx::query_as::<_, PollRow>(&format!(
        "SELECT {POLL_COLUMNS} FROM polls
         WHERE status = 'open' AND closes_at IS NOT NULL AND closes_at <= ?1"
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_pool() -> DbPool {
        let pool = crate::create_pool("sqlite::memory:", 1).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn slots(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("Mon {i}:00")).collect()
    }

    #[tokio::test]
    async fn create_poll_assigns_contiguous_order() {
        let pool = test_pool().await;
        let poll_id = create_poll(&pool, "When?", "U1", "C1", &slots(5), None)
            .await
            .unwrap();

        let options = get_poll_options(&pool, poll_id).await.unwrap();
        assert_eq!(options.len(), 5);
        for (idx, opt) in options.iter().enumerate() {
            assert_eq!(opt.option_order, idx as i64 + 1);
            assert_eq!(opt.option_text, format!("Mon {}:00", idx + 1));
        }
    }

    #[tokio::test]
    async fn create_poll_rejects_duplicate_option_text() {
        let pool = test_pool().await;
        let mut options = slots(5);
        options[4] = options[0].clone();
        let err = create_poll(&pool, "When?", "U1", "C1", &options, None).await;
        assert!(err.is_err());

        // The rejected creation must not leave an orphan poll behind.
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM polls")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn get_poll_not_found_is_none() {
        let pool = test_pool().await;
        assert!(get_poll(&pool, 999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn message_ref_is_set_once() {
        let pool = test_pool().await;
        let poll_id = create_poll(&pool, "When?", "U1", "C1", &slots(5), None)
            .await
            .unwrap();

        assert!(set_message_ref(&pool, poll_id, "1700000000.0001").await.unwrap());
        assert!(!set_message_ref(&pool, poll_id, "1700000000.0002").await.unwrap());
        let poll = get_poll(&pool, poll_id).await.unwrap().unwrap();
        assert_eq!(poll.message_ref.as_deref(), Some("1700000000.0001"));
    }

    #[tokio::test]
    async fn set_user_votes_replaces_wholesale() {
        let pool = test_pool().await;
        let poll_id = create_poll(&pool, "When?", "U1", "C1", &slots(5), None)
            .await
            .unwrap();
        let options = get_poll_options(&pool, poll_id).await.unwrap();

        set_user_votes(&pool, poll_id, "U2", &[options[0].id, options[1].id])
            .await
            .unwrap();
        set_user_votes(&pool, poll_id, "U2", &[options[2].id])
            .await
            .unwrap();

        let votes = get_user_votes(&pool, poll_id, "U2").await.unwrap();
        assert_eq!(votes, vec![options[2].id]);
    }

    #[tokio::test]
    async fn set_user_votes_empty_set_clears() {
        let pool = test_pool().await;
        let poll_id = create_poll(&pool, "When?", "U1", "C1", &slots(5), None)
            .await
            .unwrap();
        let options = get_poll_options(&pool, poll_id).await.unwrap();

        set_user_votes(&pool, poll_id, "U2", &[options[0].id]).await.unwrap();
        set_user_votes(&pool, poll_id, "U2", &[]).await.unwrap();

        assert!(get_user_votes(&pool, poll_id, "U2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_user_votes_rejects_foreign_option_and_rolls_back() {
        let pool = test_pool().await;
        let poll_a = create_poll(&pool, "A?", "U1", "C1", &slots(5), None).await.unwrap();
        let poll_b = create_poll(&pool, "B?", "U1", "C1", &slots(5), None).await.unwrap();
        let a_options = get_poll_options(&pool, poll_a).await.unwrap();
        let b_options = get_poll_options(&pool, poll_b).await.unwrap();

        set_user_votes(&pool, poll_a, "U2", &[a_options[0].id]).await.unwrap();
        let err = set_user_votes(&pool, poll_a, "U2", &[b_options[0].id]).await;
        assert!(matches!(err, Err(DbError::NotFound)));

        // Rolled back: the pre-existing vote survives the failed replace.
        let votes = get_user_votes(&pool, poll_a, "U2").await.unwrap();
        assert_eq!(votes, vec![a_options[0].id]);
    }

    #[tokio::test]
    async fn results_are_ordered_and_zero_filled() {
        let pool = test_pool().await;
        let poll_id = create_poll(&pool, "When?", "U1", "C1", &slots(5), None)
            .await
            .unwrap();
        let options = get_poll_options(&pool, poll_id).await.unwrap();

        set_user_votes(&pool, poll_id, "U2", &[options[1].id]).await.unwrap();
        set_user_votes(&pool, poll_id, "U3", &[options[1].id, options[4].id])
            .await
            .unwrap();

        let results = get_poll_results(&pool, poll_id).await.unwrap();
        assert_eq!(results.len(), 5);
        let orders: Vec<i64> = results.iter().map(|r| r.option_order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4, 5]);

        assert_eq!(results[0].vote_count, 0);
        assert!(results[0].voters.is_empty());
        assert_eq!(results[1].vote_count, 2);
        assert_eq!(results[1].voters.len(), 2);
        assert_eq!(results[4].vote_count, 1);
        for r in &results {
            assert_eq!(r.vote_count as usize, r.voters.len());
        }

        assert_eq!(count_distinct_voters(&pool, poll_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn close_poll_is_conditional() {
        let pool = test_pool().await;
        let poll_id = create_poll(&pool, "When?", "U1", "C1", &slots(5), None)
            .await
            .unwrap();

        assert!(close_poll(&pool, poll_id).await.unwrap());
        assert!(!close_poll(&pool, poll_id).await.unwrap());
        assert!(!close_poll(&pool, 999).await.unwrap());

        let poll = get_poll(&pool, poll_id).await.unwrap().unwrap();
        assert_eq!(poll.status, PollStatus::Closed);
    }

    #[tokio::test]
    async fn expired_polls_query_respects_clock_and_status() {
        let pool = test_pool().await;
        let now = Utc::now();

        let past = create_poll(&pool, "past", "U1", "C1", &slots(5), Some(now - Duration::minutes(5)))
            .await
            .unwrap();
        let future =
            create_poll(&pool, "future", "U1", "C1", &slots(5), Some(now + Duration::hours(1)))
                .await
                .unwrap();
        let open_ended = create_poll(&pool, "open-ended", "U1", "C1", &slots(5), None)
            .await
            .unwrap();

        let expired = get_expired_polls(&pool, now).await.unwrap();
        let ids: Vec<i64> = expired.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![past]);
        assert!(!ids.contains(&future));
        assert!(!ids.contains(&open_ended));

        // Once closed it drops out of the expiry sweep's view.
        close_poll(&pool, past).await.unwrap();
        assert!(get_expired_polls(&pool, now).await.unwrap().is_empty());
    }
}
