//! Bounded prompt assembly for a single model call.
//!
//! The system prompt, constraint block, the newest cycle (its action and
//! observation) and the final user turn are required and are never truncated.
//! Older history is included newest-first while it fits, so the oldest cycles
//! drop out of the context view first. The recalled-memory message has the
//! lowest priority and is only kept when room remains after history.

use tracing::debug;

use crate::core::tokens::{ModelInfo, REPLY_PRIMING_TOKENS, TokenCounter};
use crate::core::types::{ChatSequence, ContextOverflow, CycleRecord, Message, Role};

const MEMORY_HEADER: &str = "This reminds you of these events from your past:";

/// Inputs for one context build.
#[derive(Debug, Clone, Copy)]
pub struct ContextRequest<'a> {
    pub system_prompt: &'a str,
    pub constraints: &'a str,
    /// Authoritative cycle log, oldest first.
    pub history: &'a [CycleRecord],
    /// Final user turn (triggering or corrective instruction).
    pub latest_observation: &'a str,
    /// Texts recalled from long-term memory, most relevant first.
    pub memories: &'a [String],
}

/// Assembles [`ChatSequence`]s that fit a model's context window.
pub struct ContextBuilder<'a> {
    counter: &'a dyn TokenCounter,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(counter: &'a dyn TokenCounter) -> Self {
        Self { counter }
    }

    pub fn build(&self, request: &ContextRequest<'_>, model: &ModelInfo) -> ChatSequence {
        let capacity = model.max_tokens;
        let reserved = model.completion_reserve;

        let head = [
            self.message(Role::System, request.system_prompt, true, model),
            self.message(Role::System, request.constraints, true, model),
        ];
        let (older, newest) = match request.history.split_last() {
            Some((last, older)) => (older, Some(self.pair(last, model))),
            None => (request.history, None),
        };
        let tail = self.message(Role::User, request.latest_observation, false, model);

        let required_tokens = head.iter().map(|m| m.token_count).sum::<usize>()
            + newest.as_ref().map_or(0, pair_tokens)
            + tail.token_count
            + REPLY_PRIMING_TOKENS;
        if required_tokens + reserved > capacity {
            debug!(
                required_tokens,
                reserved, capacity, "required turns exceed context window"
            );
            let mut messages = head.to_vec();
            messages.extend(newest.into_iter().flatten());
            messages.push(tail);
            return ChatSequence {
                model: model.name.clone(),
                messages,
                capacity,
                reserved_completion: reserved,
                prompt_tokens: required_tokens,
                overflow: Some(ContextOverflow {
                    required_tokens: required_tokens + reserved,
                    capacity,
                }),
            };
        }

        let mut used = required_tokens + reserved;

        // Walk newest to oldest; stop at the first pair that does not fit.
        let mut included: Vec<[Message; 2]> = Vec::new();
        for record in older.iter().rev() {
            let pair = self.pair(record, model);
            let tokens = pair_tokens(&pair);
            if used + tokens > capacity {
                debug!(
                    included = included.len(),
                    dropped = older.len() - included.len(),
                    "history truncated to fit context window"
                );
                break;
            }
            used += tokens;
            included.push(pair);
        }

        let memory = render_memories(request.memories)
            .map(|body| self.message(Role::System, &body, false, model))
            .filter(|m| {
                let fits = used + m.token_count <= capacity;
                if !fits {
                    debug!(tokens = m.token_count, "dropped memory message for budget");
                }
                fits
            });
        if let Some(m) = &memory {
            used += m.token_count;
        }

        let mut messages = head.to_vec();
        messages.extend(memory);
        for pair in included.into_iter().rev() {
            messages.extend(pair);
        }
        messages.extend(newest.into_iter().flatten());
        messages.push(tail);

        ChatSequence {
            model: model.name.clone(),
            messages,
            capacity,
            reserved_completion: reserved,
            prompt_tokens: used - reserved,
            overflow: None,
        }
    }

    /// Assistant action summary followed by the observation it produced.
    fn pair(&self, record: &CycleRecord, model: &ModelInfo) -> [Message; 2] {
        [
            self.message(Role::Assistant, &record.action_summary(), false, model),
            self.message(Role::User, &record.observation, false, model),
        ]
    }

    fn message(&self, role: Role, content: &str, cacheable: bool, model: &ModelInfo) -> Message {
        Message {
            role,
            content: content.to_string(),
            token_count: self.counter.count_message(role, content, model),
            cacheable,
        }
    }
}

fn pair_tokens(pair: &[Message; 2]) -> usize {
    pair[0].token_count + pair[1].token_count
}

fn render_memories(memories: &[String]) -> Option<String> {
    let items: Vec<&str> = memories
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .collect();
    if items.is_empty() {
        return None;
    }
    let mut body = String::from(MEMORY_HEADER);
    for item in items {
        body.push_str("\n\n");
        body.push_str(item);
    }
    Some(body)
}
