pub mod error;
pub mod event;
pub mod onboarding;
pub mod poll;
pub mod surface;
pub mod sweeper;

pub use error::CoreError;
pub use surface::{BoxError, ChatSurface, EventView, Notification, PollView};
