//! New-member onboarding: registration import, welcome email dispatch,
//! and committee channel assignment when a member joins the workspace.
//!
//! The spreadsheet connector and the mailer live outside this crate;
//! they appear here only as the narrow traits below.

use crate::error::CoreError;
use crate::surface::{BoxError, ChatSurface, Notification};
use chrono::{DateTime, Utc};
use quorum_db::members::{self, CommitteeChannelRow, NewMember};
use quorum_db::DbPool;
use std::future::Future;

/// One row pulled from the registration spreadsheet.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Comma-separated committee names as entered on the form.
    pub committees: String,
    pub registered_at: Option<DateTime<Utc>>,
}

pub trait RegistrationSource: Send + Sync {
    fn fetch_registrations(
        &self,
    ) -> impl Future<Output = Result<Vec<Registration>, BoxError>> + Send;
}

pub trait WelcomeMailer: Send + Sync {
    fn send_welcome(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct OnboardingPolicy {
    /// Send welcome emails for newly imported registrations.
    pub send_email: bool,
    /// Ignore registrations submitted before this cutoff.
    pub registered_after: Option<DateTime<Utc>>,
    /// Send a welcome DM when a member joins the workspace.
    pub send_dm: bool,
}

/// Import new registrations and send welcome emails. Returns how many
/// registrations were newly processed. A failed email leaves the member
/// pending; the next run retries everyone still unsent.
pub async fn process_registrations<Src, M>(
    pool: &DbPool,
    source: &Src,
    mailer: &M,
    policy: &OnboardingPolicy,
) -> Result<usize, CoreError>
where
    Src: RegistrationSource,
    M: WelcomeMailer,
{
    let registrations = match source.fetch_registrations().await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(error = %e, "registration source unavailable, skipping run");
            return Ok(0);
        }
    };

    let mut imported = 0;
    for reg in registrations {
        let email = reg.email.trim().to_lowercase();
        if email.is_empty() {
            continue;
        }
        if let (Some(cutoff), Some(registered_at)) = (policy.registered_after, reg.registered_at) {
            if registered_at < cutoff {
                continue;
            }
        }

        let added = members::add_member(
            pool,
            &NewMember {
                email: email.clone(),
                first_name: reg.first_name.clone(),
                last_name: reg.last_name.clone(),
                committees: reg.committees.clone(),
                registered_at: reg.registered_at,
                email_sent: false,
                onboarded: false,
            },
        )
        .await?;
        if !added {
            continue;
        }
        imported += 1;
        tracing::info!(email, "imported new registration");
    }

    if policy.send_email {
        for member in members::get_pending_email_members(pool).await? {
            match mailer
                .send_welcome(&member.email, &member.first_name, &member.last_name)
                .await
            {
                Ok(()) => members::mark_email_sent(pool, &member.email).await?,
                Err(e) => {
                    tracing::warn!(email = member.email, error = %e, "welcome email failed, will retry")
                }
            }
        }
    }

    Ok(imported)
}

/// Import every current registration as already onboarded, so no emails
/// go out to people who were members before the bot existed.
pub async fn seed_existing_members<Src: RegistrationSource>(
    pool: &DbPool,
    source: &Src,
) -> Result<usize, CoreError> {
    let registrations = match source.fetch_registrations().await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(error = %e, "registration source unavailable, nothing seeded");
            return Ok(0);
        }
    };

    let mut seeded = 0;
    for reg in registrations {
        let email = reg.email.trim().to_lowercase();
        if email.is_empty() {
            continue;
        }
        let added = members::add_member(
            pool,
            &NewMember {
                email,
                first_name: reg.first_name.clone(),
                last_name: reg.last_name.clone(),
                committees: reg.committees.clone(),
                registered_at: reg.registered_at,
                email_sent: true,
                onboarded: true,
            },
        )
        .await?;
        if added {
            seeded += 1;
        }
    }
    Ok(seeded)
}

/// A known member joined the workspace: link their chat identity, add
/// them to their committees' channels, optionally DM a welcome, and mark
/// them onboarded. Returns false if the email is not a processed member
/// (nothing to do).
pub async fn handle_member_joined<C: ChatSurface>(
    pool: &DbPool,
    surface: &C,
    chat_user_id: &str,
    email: &str,
    policy: &OnboardingPolicy,
) -> Result<bool, CoreError> {
    let email = email.to_lowercase();
    let Some(member) = members::get_member_by_email(pool, &email).await? else {
        tracing::info!(email, "joining user not in member registry, skipping onboarding");
        return Ok(false);
    };

    members::set_member_chat_user(pool, &email, chat_user_id).await?;

    let committees: Vec<&str> = member
        .committees
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();

    if !committees.is_empty() {
        let mappings = members::get_committee_channels(pool).await?;
        let mut assigned_any = false;
        for committee in &committees {
            let Some(channel_id) = find_channel_for_committee(committee, &mappings) else {
                tracing::warn!(committee, "no channel mapping for committee");
                continue;
            };
            match surface.invite_to_channel(channel_id, chat_user_id).await {
                Ok(()) => {
                    assigned_any = true;
                    tracing::info!(chat_user_id, channel_id, committee, "assigned committee channel");
                }
                Err(e) => {
                    tracing::warn!(chat_user_id, channel_id, error = %e, "channel invite failed")
                }
            }
        }
        if assigned_any {
            members::mark_channels_assigned(pool, &email).await?;
        }
    }

    if policy.send_dm {
        let name = if member.first_name.is_empty() {
            "there"
        } else {
            member.first_name.as_str()
        };
        let note = Notification {
            title: format!("Welcome, {name}!"),
            body: match committees.len() {
                0 => "Glad to have you on board.".to_string(),
                _ => format!(
                    "Glad to have you on board. Your committees: {}",
                    committees.join(", ")
                ),
            },
        };
        match surface.notify_user(chat_user_id, &note).await {
            Ok(()) => members::mark_dm_sent(pool, &email).await?,
            Err(e) => tracing::warn!(chat_user_id, error = %e, "welcome DM failed"),
        }
    }

    members::mark_onboarded(pool, &email).await?;
    tracing::info!(chat_user_id, email, "member onboarded");
    Ok(true)
}

/// Match a committee name to a mapped channel: exact (case-insensitive)
/// first, then substring in either direction.
pub fn find_channel_for_committee<'a>(
    committee: &str,
    mappings: &'a [CommitteeChannelRow],
) -> Option<&'a str> {
    let committee = committee.trim().to_lowercase();

    for mapping in mappings {
        if mapping.committee_name.to_lowercase() == committee {
            return Some(&mapping.channel_id);
        }
    }
    for mapping in mappings {
        let mapped = mapping.committee_name.to_lowercase();
        if committee.contains(&mapped) || mapped.contains(&committee) {
            return Some(&mapping.channel_id);
        }
    }
    None
}
