use crate::{DbError, DbPool};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberRow {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Comma-separated committee names as they appeared on the
    /// registration form.
    pub committees: String,
    pub chat_user_id: Option<String>,
    pub email_sent: bool,
    pub dm_sent: bool,
    pub channels_assigned: bool,
    pub onboarded: bool,
    pub registered_at: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewMember {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub committees: String,
    pub registered_at: Option<DateTime<Utc>>,
    pub email_sent: bool,
    pub onboarded: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OnboardingStats {
    pub total: i64,
    pub email_sent: i64,
    pub onboarded: i64,
    pub channels_assigned: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommitteeChannelRow {
    pub committee_name: String,
    pub channel_id: String,
}

const MEMBER_COLUMNS: &str = "email, first_name, last_name, committees, chat_user_id, \
     email_sent, dm_sent, channels_assigned, onboarded, registered_at, added_at";

/// Idempotent registration: returns false when the email is already on
/// file, leaving the existing row untouched.
pub async fn add_member(pool: &DbPool, member: &NewMember) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO members (email, first_name, last_name, committees, registered_at,
                              email_sent, onboarded, added_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (email) DO NOTHING",
    )
    .bind(member.email.to_lowercase())
    .bind(&member.first_name)
    .bind(&member.last_name)
    .bind(&member.committees)
    .bind(member.registered_at)
    .bind(member.email_sent)
    .bind(member.onboarded)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_member_by_email(
    pool: &DbPool,
    email: &str,
) -> Result<Option<MemberRow>, DbError> {
    let row = sqlx::query_as::<_, MemberRow>(&format!(
        "SELECT {MEMBER_COLUMNS} FROM members WHERE email = ?1"
    ))
    .bind(email.to_lowercase())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn is_member_processed(pool: &DbPool, email: &str) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM members WHERE email = ?1")
        .bind(email.to_lowercase())
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

pub async fn set_member_chat_user(
    pool: &DbPool,
    email: &str,
    chat_user_id: &str,
) -> Result<(), DbError> {
    sqlx::query("UPDATE members SET chat_user_id = ?2 WHERE email = ?1")
        .bind(email.to_lowercase())
        .bind(chat_user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_email_sent(pool: &DbPool, email: &str) -> Result<(), DbError> {
    set_member_flag(pool, email, "email_sent").await
}

pub async fn mark_dm_sent(pool: &DbPool, email: &str) -> Result<(), DbError> {
    set_member_flag(pool, email, "dm_sent").await
}

pub async fn mark_channels_assigned(pool: &DbPool, email: &str) -> Result<(), DbError> {
    set_member_flag(pool, email, "channels_assigned").await
}

pub async fn mark_onboarded(pool: &DbPool, email: &str) -> Result<(), DbError> {
    set_member_flag(pool, email, "onboarded").await
}

async fn set_member_flag(pool: &DbPool, email: &str, column: &str) -> Result<(), DbError> {
    // column is a compile-time constant from the callers above
    sqlx::query(&format!("UPDATE members SET {column} = 1 WHERE email = ?1"))
        .bind(email.to_lowercase())
        .execute(pool)
        .await?;
    Ok(())
}

/// Members whose welcome email has not gone out yet.
pub async fn get_pending_email_members(pool: &DbPool) -> Result<Vec<MemberRow>, DbError> {
    let rows = sqlx::query_as::<_, MemberRow>(&format!(
        "SELECT {MEMBER_COLUMNS} FROM members WHERE email_sent = 0 ORDER BY added_at"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Clear the email-sent flag for members registered on or after the
/// cutoff, so the next registration sweep re-sends to them. Returns how
/// many rows were flipped.
pub async fn unseed_members_since(
    pool: &DbPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE members SET email_sent = 0
         WHERE email_sent = 1 AND registered_at IS NOT NULL AND registered_at >= ?1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn onboarding_stats(pool: &DbPool) -> Result<OnboardingStats, DbError> {
    let (total, email_sent, onboarded, channels_assigned): (i64, i64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*),
                COALESCE(SUM(email_sent), 0),
                COALESCE(SUM(onboarded), 0),
                COALESCE(SUM(channels_assigned), 0)
         FROM members",
    )
    .fetch_one(pool)
    .await?;
    Ok(OnboardingStats {
        total,
        email_sent,
        onboarded,
        channels_assigned,
    })
}

/// Upsert a committee -> channel mapping.
pub async fn set_committee_channel(
    pool: &DbPool,
    committee_name: &str,
    channel_id: &str,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO committee_channels (committee_name, channel_id)
         VALUES (?1, ?2)
         ON CONFLICT (committee_name) DO UPDATE SET channel_id = excluded.channel_id",
    )
    .bind(committee_name)
    .bind(channel_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_committee_channel(
    pool: &DbPool,
    committee_name: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM committee_channels WHERE committee_name = ?1")
        .bind(committee_name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_committee_channels(pool: &DbPool) -> Result<Vec<CommitteeChannelRow>, DbError> {
    let rows = sqlx::query_as::<_, CommitteeChannelRow>(
        "SELECT committee_name, channel_id FROM committee_channels ORDER BY committee_name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Returns false if the user is already an admin.
pub async fn add_onboard_admin(
    pool: &DbPool,
    user_id: &str,
    added_by: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO onboard_admins (user_id, added_by, added_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(added_by)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_onboard_admin(pool: &DbPool, user_id: &str) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM onboard_admins WHERE user_id = ?1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn is_onboard_admin(pool: &DbPool, user_id: &str) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM onboard_admins WHERE user_id = ?1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

pub async fn get_onboard_admins(pool: &DbPool) -> Result<Vec<String>, DbError> {
    let users: Vec<String> =
        sqlx::query_scalar("SELECT user_id FROM onboard_admins ORDER BY added_at")
            .fetch_all(pool)
            .await?;
    Ok(users)
}
