//! Autonomous agent loop with budget and human confirmation controls.
//!
//! Each cycle assembles a bounded prompt, asks a language model for one
//! structured action, validates it, optionally asks a human to confirm, and
//! dispatches it to a registered command. The observation feeds the next
//! cycle until a terminal state is reached. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (token accounting, context
//!   assembly, reply interpretation, budget and confirmation state).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (model service process, console,
//!   config/profile files, prompt templates, the per-cycle log).
//!
//! [`looping`] orchestrates both into the agent loop; [`commands`],
//! [`hooks`] and [`memory`] are the collaborator seams the loop is given.

pub mod commands;
pub mod core;
pub mod exit_codes;
pub mod hooks;
pub mod io;
pub mod logging;
pub mod looping;
pub mod memory;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
