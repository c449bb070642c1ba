//! Poll business rules on top of the store: creation validation, the
//! group-scoped vote diff, outcome tallying, and the close transition.

use crate::error::CoreError;
use crate::surface::{ChatSurface, PollView};
use chrono::{DateTime, Utc};
use quorum_db::polls::{self, PollOptionResult, PollStatus};
use quorum_db::DbPool;
use std::collections::HashSet;

pub const MIN_OPTIONS: usize = 5;
pub const MAX_OPTIONS: usize = 25;
/// Hard rendering limit of the chat surface: at most 10 checkboxes per
/// group, so votes arrive one group at a time.
pub const VOTE_GROUP_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    pub closes_at: Option<DateTime<Utc>>,
    pub creator_id: String,
    pub channel_id: String,
}

impl NewPoll {
    /// Pure input validation, before any storage write. Returns the
    /// trimmed option texts in input order.
    fn validate(&self) -> Result<Vec<String>, CoreError> {
        if self.question.trim().is_empty() {
            return Err(CoreError::validation("question", "question must not be empty"));
        }

        let options: Vec<String> = self
            .options
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        if options.len() < MIN_OPTIONS {
            return Err(CoreError::validation(
                "options",
                format!("at least {MIN_OPTIONS} options are required"),
            ));
        }
        if options.len() > MAX_OPTIONS {
            return Err(CoreError::validation(
                "options",
                format!("at most {MAX_OPTIONS} options are allowed"),
            ));
        }

        let mut seen = HashSet::new();
        for option in &options {
            if !seen.insert(option.as_str()) {
                return Err(CoreError::validation(
                    "options",
                    format!("duplicate option: {option}"),
                ));
            }
        }

        Ok(options)
    }
}

pub async fn create_poll(pool: &DbPool, new_poll: &NewPoll) -> Result<PollView, CoreError> {
    let options = new_poll.validate()?;
    let poll_id = polls::create_poll(
        pool,
        new_poll.question.trim(),
        &new_poll.creator_id,
        &new_poll.channel_id,
        &options,
        new_poll.closes_at,
    )
    .await?;
    load_poll_view(pool, poll_id).await
}

/// Fresh aggregate state for a poll, re-read from the store.
pub async fn load_poll_view(pool: &DbPool, poll_id: i64) -> Result<PollView, CoreError> {
    let poll = polls::get_poll(pool, poll_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    let results = polls::get_poll_results(pool, poll_id).await?;
    let total_voters = polls::count_distinct_voters(pool, poll_id).await?;
    Ok(PollView {
        poll,
        results,
        total_voters,
    })
}

/// Apply one group's checkbox submission without touching the user's
/// selections in other groups.
///
/// Read-modify-write: take the user's current full vote set, drop every
/// id belonging to the submitted group, union in the new selections for
/// that group, write the result back wholesale.
pub async fn record_group_vote(
    pool: &DbPool,
    poll_id: i64,
    user_id: &str,
    group_index: usize,
    selected: &[i64],
) -> Result<PollView, CoreError> {
    let poll = polls::get_poll(pool, poll_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    if poll.status != PollStatus::Open {
        return Err(CoreError::Conflict(
            "poll is closed and no longer accepting votes".to_string(),
        ));
    }

    let options = polls::get_poll_options(pool, poll_id).await?;
    // A stale or absurd group index must not silently clear votes.
    let start = group_index
        .checked_mul(VOTE_GROUP_SIZE)
        .filter(|&start| start < options.len())
        .ok_or_else(|| {
            CoreError::validation("group", format!("poll has no option group {group_index}"))
        })?;

    let group_ids: HashSet<i64> = options[start..]
        .iter()
        .take(VOTE_GROUP_SIZE)
        .map(|o| o.id)
        .collect();
    for id in selected {
        if !group_ids.contains(id) {
            return Err(CoreError::validation(
                "options",
                format!("option {id} is not part of group {group_index}"),
            ));
        }
    }

    let existing: HashSet<i64> = polls::get_user_votes(pool, poll_id, user_id)
        .await?
        .into_iter()
        .collect();
    let mut updated: Vec<i64> = existing
        .difference(&group_ids)
        .copied()
        .chain(selected.iter().copied())
        .collect();
    updated.sort_unstable();
    updated.dedup();

    polls::set_user_votes(pool, poll_id, user_id, &updated).await?;
    load_poll_view(pool, poll_id).await
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Nobody voted; zero never qualifies as a winning count.
    NoVotes,
    Winner(PollOptionResult),
    /// Several options share the top count, listed in option order.
    Tie(Vec<PollOptionResult>),
}

/// Determine the winner(s) from results ordered by option order.
pub fn tally_outcome(results: &[PollOptionResult]) -> PollOutcome {
    let max = results.iter().map(|r| r.vote_count).max().unwrap_or(0);
    if max == 0 {
        return PollOutcome::NoVotes;
    }
    let mut winners: Vec<PollOptionResult> = results
        .iter()
        .filter(|r| r.vote_count == max)
        .cloned()
        .collect();
    if winners.len() == 1 {
        PollOutcome::Winner(winners.remove(0))
    } else {
        PollOutcome::Tie(winners)
    }
}

/// Creator-requested close: open -> closed, exactly once. Losing the
/// race to a concurrent close is a Conflict, not success.
pub async fn close_poll(pool: &DbPool, poll_id: i64, actor: &str) -> Result<PollView, CoreError> {
    let poll = polls::get_poll(pool, poll_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    if poll.creator_id != actor {
        return Err(CoreError::Forbidden);
    }
    if !polls::close_poll(pool, poll_id).await? {
        return Err(CoreError::Conflict("poll is already closed".to_string()));
    }
    load_poll_view(pool, poll_id).await
}

/// Close every open poll whose close time has passed, re-rendering only
/// those this sweep actually transitioned. One poll's failure never
/// aborts the rest.
pub async fn sweep_expired_polls<S: ChatSurface>(
    pool: &DbPool,
    surface: &S,
    now: DateTime<Utc>,
) -> Result<usize, CoreError> {
    let expired = polls::get_expired_polls(pool, now).await?;
    let mut closed = 0;
    for poll in expired {
        match polls::close_poll(pool, poll.id).await {
            Ok(true) => {
                closed += 1;
                tracing::info!(poll_id = poll.id, "auto-closed expired poll");
                match load_poll_view(pool, poll.id).await {
                    Ok(view) => {
                        if let Err(e) = surface.render_poll(&view).await {
                            tracing::warn!(poll_id = poll.id, error = %e, "poll re-render failed");
                        }
                    }
                    Err(e) => {
                        tracing::error!(poll_id = poll.id, error = %e, "failed to load closed poll")
                    }
                }
            }
            // Lost the close race to a user action; the winner re-rendered.
            Ok(false) => {}
            Err(e) => tracing::error!(poll_id = poll.id, error = %e, "failed to close poll"),
        }
    }
    Ok(closed)
}
