//! Placeholder implementations of the external collaborators.
//!
//! The real chat client, spreadsheet connector, and mailer are separate
//! deployables wired in here; until then these log what would have been
//! sent so the state machine can run end to end.

use quorum_core::onboarding::{Registration, RegistrationSource, WelcomeMailer};
use quorum_core::{BoxError, ChatSurface, EventView, Notification, PollView};

#[derive(Debug, Clone, Default)]
pub struct TracingSurface;

impl ChatSurface for TracingSurface {
    async fn render_poll(&self, view: &PollView) -> Result<(), BoxError> {
        tracing::info!(
            poll_id = view.poll.id,
            status = ?view.poll.status,
            total_voters = view.total_voters,
            "render poll"
        );
        Ok(())
    }

    async fn render_event(&self, view: &EventView) -> Result<(), BoxError> {
        tracing::info!(
            event_id = view.event.id,
            status = ?view.event.status,
            going = view.counts.going,
            maybe = view.counts.maybe,
            "render event"
        );
        Ok(())
    }

    async fn notify_user(&self, user_id: &str, note: &Notification) -> Result<(), BoxError> {
        tracing::info!(user_id, title = %note.title, "notify user");
        Ok(())
    }

    async fn invite_to_channel(&self, channel_id: &str, user_id: &str) -> Result<(), BoxError> {
        tracing::info!(channel_id, user_id, "invite to channel");
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DisconnectedRegistrationSource;

impl RegistrationSource for DisconnectedRegistrationSource {
    async fn fetch_registrations(&self) -> Result<Vec<Registration>, BoxError> {
        tracing::debug!("no registration source configured");
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TracingMailer;

impl WelcomeMailer for TracingMailer {
    async fn send_welcome(
        &self,
        email: &str,
        first_name: &str,
        _last_name: &str,
    ) -> Result<(), BoxError> {
        tracing::info!(email, first_name, "send welcome email");
        Ok(())
    }
}
