//! Shared deterministic types for the agent loop.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::cost::Cost;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a chat sequence. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub token_count: usize,
    /// Stable prefix content that a provider may cache across requests.
    pub cacheable: bool,
}

/// Marker attached to a sequence whose required turns exceed the model window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOverflow {
    /// Tokens needed by the required turns plus the completion reserve.
    pub required_tokens: usize,
    pub capacity: usize,
}

/// Ordered messages bounded by a model's context window.
///
/// Invariant (when `overflow` is `None`): `prompt_tokens + reserved_completion <= capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSequence {
    pub model: String,
    pub messages: Vec<Message>,
    pub capacity: usize,
    pub reserved_completion: usize,
    /// Estimated prompt tokens, including reply priming.
    pub prompt_tokens: usize,
    pub overflow: Option<ContextOverflow>,
}

impl ChatSequence {
    pub fn is_overflow(&self) -> bool {
        self.overflow.is_some()
    }

    /// Tokens left for the completion once the prompt is sent.
    pub fn completion_budget(&self) -> usize {
        self.capacity.saturating_sub(self.prompt_tokens)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// The single command named by a model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCall {
    pub name: String,
    pub args: Map<String, Value>,
}

/// A model reply that passed schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAction {
    pub thought: String,
    pub reasoning: String,
    pub plan: Vec<String>,
    pub criticism: String,
    pub command: CommandCall,
}

impl ParsedAction {
    /// Compact JSON rendering used when replaying the action in history.
    pub fn summary(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.command.name.clone())
    }
}

/// One entry of the append-only execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub index: u32,
    pub sequence_sent: ChatSequence,
    pub raw_reply: String,
    pub action: Option<ParsedAction>,
    pub observation: String,
    pub cost: Cost,
    /// Number of model replies parsed in this cycle (1 = no retry).
    pub parse_attempts: u32,
}

impl CycleRecord {
    /// Assistant-side text used when this cycle is replayed as history.
    pub fn action_summary(&self) -> String {
        match &self.action {
            Some(action) => action.summary(),
            None => self.raw_reply.clone(),
        }
    }

    pub fn command_name(&self) -> Option<&str> {
        self.action.as_ref().map(|a| a.command.name.as_str())
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// A terminal command (`finish`) was dispatched.
    Completed,
    BudgetExceeded,
    MaxCyclesReached,
    /// The human sent `EXIT` or the stop signal was raised.
    UserAbort,
    /// Fatal gateway failure, context overflow, or repeated unusable replies.
    UnrecoverableError,
}

impl TerminalState {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalState::Completed => "completed",
            TerminalState::BudgetExceeded => "budget_exceeded",
            TerminalState::MaxCyclesReached => "max_cycles_reached",
            TerminalState::UserAbort => "user_abort",
            TerminalState::UnrecoverableError => "unrecoverable_error",
        }
    }
}

/// Per-cycle notification for display or logging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleEvent {
    pub cycle_index: u32,
    pub command: Option<String>,
    pub observation: String,
    pub cumulative_spent: Cost,
    pub terminal: Option<TerminalState>,
}

/// Final outcome of a loop run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopReport {
    pub terminal_state: TerminalState,
    /// Human-readable explanation of the terminal state.
    pub reason: String,
    pub cycle_count: u32,
    pub total_spent: Cost,
    pub last_observation: Option<String>,
    #[serde(skip)]
    pub log: Vec<CycleRecord>,
}
