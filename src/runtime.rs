//! Turn execution engine
//!
//! One turn runs from a new user message (or a resume command) until the
//! model produces a final reply or the turn suspends for authorization.
//! Every transition is checkpointed before the next node runs.

mod executor;
mod locks;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{EngineConfig, TurnEngine, TurnError, TurnInput, TurnOutcome};
pub use locks::{ThreadGuard, ThreadLocks};
pub use traits::Capabilities;
