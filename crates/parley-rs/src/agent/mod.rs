//! Agent runtime: the [`Session`] orchestration loop and its supporting modules.
//!
//! - [`session::Session`]: runs user queries through completion and tool
//!   rounds. Start here.
//! - [`config::SessionSettings`]: model, limits, and timeouts, plus
//!   [`SettingsUpdate`] for partial changes at runtime.
//! - [`events`]: [`EventHandler`] trait and [`SessionEvent`] enum for
//!   observing the loop. Includes [`LoggingHandler`], [`CompositeEventHandler`],
//!   [`FnEventHandler`], and [`BroadcastSink`].
//! - [`execution`]: sequential tool execution with timeouts.

pub mod config;
pub mod events;
pub mod execution;
pub mod session;

// Re-export commonly used items at the module level.
pub use config::{SessionSettings, SettingsUpdate};
pub use events::{
    BroadcastSink, CompositeEventHandler, EventContent, EventHandler, EventRecord,
    FnEventHandler, LoggingHandler, NoopHandler, SessionEvent,
};
pub use execution::ToolCall;
pub use session::{QueryOutcome, Session, SessionBuilder, SessionHandle, SettingsUpdater};
