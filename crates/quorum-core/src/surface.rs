//! Interfaces to the chat platform and aggregate view types.
//!
//! The core never inspects what the surface does with a view; it only
//! cares that delivery is fallible. All surface failures are logged and
//! swallowed by the caller, strictly after the store mutation committed,
//! so a rendering failure can lag the display behind committed state but
//! never contradict it.

use quorum_db::events::{EventRow, RsvpCounts};
use quorum_db::polls::{PollOptionResult, PollRow};
use serde::Serialize;
use std::future::Future;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A poll plus everything needed to render it: results in option order
/// and the distinct-voter total.
#[derive(Debug, Clone, Serialize)]
pub struct PollView {
    pub poll: PollRow,
    pub results: Vec<PollOptionResult>,
    pub total_voters: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub event: EventRow,
    pub counts: RsvpCounts,
    pub going: Vec<String>,
    pub maybe: Vec<String>,
    pub not_going: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// The chat platform, as seen from the core: push a rendered view,
/// deliver a direct notification, add a user to a channel. Identity
/// strings are opaque; the core never validates or resolves them.
pub trait ChatSurface: Send + Sync {
    fn render_poll(&self, view: &PollView) -> impl Future<Output = Result<(), BoxError>> + Send;

    fn render_event(&self, view: &EventView) -> impl Future<Output = Result<(), BoxError>> + Send;

    fn notify_user(
        &self,
        user_id: &str,
        note: &Notification,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;

    fn invite_to_channel(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}
