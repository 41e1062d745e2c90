//! Stable exit codes for autoloop CLI commands.

use crate::core::types::TerminalState;

/// Command succeeded, or the run ended COMPLETED.
pub const OK: i32 = 0;
/// Invalid workspace/config/profile, an unusable reply file, or another error.
pub const INVALID: i32 = 1;
/// The run stopped at the spending ceiling.
pub const BUDGET_EXCEEDED: i32 = 2;
/// The run hit `max_cycles`.
pub const MAX_CYCLES_REACHED: i32 = 3;
/// The human sent EXIT, closed the input, or a stop was requested.
pub const USER_ABORT: i32 = 4;
/// Fatal model failure, context overflow, or repeated unusable replies.
pub const UNRECOVERABLE_ERROR: i32 = 5;

pub fn for_terminal(state: TerminalState) -> i32 {
    match state {
        TerminalState::Completed => OK,
        TerminalState::BudgetExceeded => BUDGET_EXCEEDED,
        TerminalState::MaxCyclesReached => MAX_CYCLES_REACHED,
        TerminalState::UserAbort => USER_ABORT,
        TerminalState::UnrecoverableError => UNRECOVERABLE_ERROR,
    }
}
