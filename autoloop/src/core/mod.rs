//! Deterministic, pure logic shared by the agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod context;
pub mod cost;
pub mod gate;
pub mod interpret;
pub mod repair;
pub mod tokens;
pub mod types;
