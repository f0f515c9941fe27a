//! Archer: a conversational assistant whose turns run as a small graph
//! (`agent → check_auth → auth_interrupt → tools → agent`) with every
//! transition checkpointed, so a turn parked on user authorization can be
//! resumed later from exactly where it stopped.

pub mod api;
pub mod checkpoint;
pub mod config;
pub mod dedup;
pub mod llm;
pub mod orchestrator;
pub mod preferences;
pub mod runtime;
pub mod state_machine;
pub mod system_prompt;
pub mod tools;
