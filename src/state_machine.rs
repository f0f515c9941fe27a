//! Turn graph
//!
//! `agent -> route -> {done | tools | check_auth -> auth_interrupt -> tools}`
//! with `tools -> agent` closing the loop. The transition function is pure;
//! the executor in `runtime` performs the I/O each node requires.

pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use event::{Event, PendingAuthorization};
pub use state::{ConversationState, Node, ResumeSignal, ThreadIdentity};
pub use transition::{
    format_auth_message, route, transition, Next, TransitionError, TransitionResult,
};
