//! Human-confirmation state machine.
//!
//! States: `AUTONOMOUS` (never asks), `ASK` (asks every cycle) and `AUTO_N`
//! (dispatches the next N cycles without asking, then reverts to `ASK`). This
//! module is pure; the prompt itself lives in [`crate::io::console`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Configured gate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    Autonomous,
    Interactive,
}

/// Current gate state, owned by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfirmationState {
    pub mode: GateMode,
    pub remaining_auto_approvals: u32,
}

/// Named states of the gate, derived from [`ConfirmationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Autonomous,
    Ask,
    AutoN(u32),
}

/// What the gate needs before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precheck {
    /// Dispatch without asking.
    Dispatch,
    /// A human answer is required.
    Ask,
}

/// A parsed human answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanReply {
    /// `y`: dispatch this action once.
    Approve,
    /// `y -N`: dispatch this action and the next N without asking.
    ApproveMany(u32),
    /// `n [reason]`: do not dispatch; the rejection is fed back to the model.
    Reject(Option<String>),
    /// Any other text: do not dispatch; the text steers the model.
    Feedback(String),
    /// `EXIT`: stop the run.
    Exit,
    /// Unusable input (empty, or `y -` with a bad count); ask again.
    Invalid(String),
}

/// Gate verdict for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Dispatch,
    /// Do not dispatch; `observation` becomes the cycle's observation.
    Withhold { observation: String },
    Exit,
}

static APPROVE_MANY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i:y)\s+-\s*(\S+)$").expect("approve pattern is valid"));
static REJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i:n)(?:\s+(.*))?$").expect("reject pattern is valid"));

/// Parse one line of human input.
pub fn parse_reply(input: &str) -> HumanReply {
    let text = input.trim();
    if text.is_empty() {
        return HumanReply::Invalid("empty input".to_string());
    }
    if text.eq_ignore_ascii_case("exit") {
        return HumanReply::Exit;
    }
    if text.eq_ignore_ascii_case("y") {
        return HumanReply::Approve;
    }
    if let Some(caps) = APPROVE_MANY_RE.captures(text) {
        let raw = caps.get(1).map_or("", |m| m.as_str());
        return match raw.parse::<u32>() {
            Ok(n) if n > 0 => HumanReply::ApproveMany(n),
            _ => HumanReply::Invalid(format!("expected 'y -N' with N > 0 (got '{raw}')")),
        };
    }
    if let Some(caps) = REJECT_RE.captures(text) {
        let reason = caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());
        return HumanReply::Reject(reason);
    }
    HumanReply::Feedback(text.to_string())
}

impl ConfirmationState {
    pub fn new(mode: GateMode, remaining_auto_approvals: u32) -> Self {
        Self {
            mode,
            remaining_auto_approvals,
        }
    }

    pub fn phase(&self) -> GatePhase {
        match (self.mode, self.remaining_auto_approvals) {
            (GateMode::Autonomous, _) => GatePhase::Autonomous,
            (GateMode::Interactive, 0) => GatePhase::Ask,
            (GateMode::Interactive, n) => GatePhase::AutoN(n),
        }
    }

    /// Advance the gate for a new cycle, consuming one auto-approval if available.
    pub fn begin_cycle(&mut self) -> Precheck {
        match self.phase() {
            GatePhase::Autonomous => Precheck::Dispatch,
            GatePhase::AutoN(n) => {
                self.remaining_auto_approvals = n - 1;
                Precheck::Dispatch
            }
            GatePhase::Ask => Precheck::Ask,
        }
    }

    /// Apply a human answer given while in `ASK`.
    ///
    /// Returns `None` for [`HumanReply::Invalid`]; the caller asks again.
    pub fn apply(&mut self, command: &str, reply: &HumanReply) -> Option<GateDecision> {
        match reply {
            HumanReply::Approve => Some(GateDecision::Dispatch),
            HumanReply::ApproveMany(n) => {
                self.remaining_auto_approvals = *n;
                Some(GateDecision::Dispatch)
            }
            HumanReply::Reject(reason) => Some(GateDecision::Withhold {
                observation: rejection_observation(command, reason.as_deref()),
            }),
            HumanReply::Feedback(text) => Some(GateDecision::Withhold {
                observation: format!("Human feedback: {text}"),
            }),
            HumanReply::Exit => Some(GateDecision::Exit),
            HumanReply::Invalid(_) => None,
        }
    }
}

/// Observation used when a human rejects, or the confirmation prompt times out.
pub fn rejection_observation(command: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("Human rejected command '{command}'. Reason: {reason}"),
        None => format!("Human rejected command '{command}'."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replies() {
        assert_eq!(parse_reply("y"), HumanReply::Approve);
        assert_eq!(parse_reply(" Y "), HumanReply::Approve);
        assert_eq!(parse_reply("y -3"), HumanReply::ApproveMany(3));
        assert_eq!(parse_reply("y - 12"), HumanReply::ApproveMany(12));
        assert_eq!(parse_reply("n"), HumanReply::Reject(None));
        assert_eq!(
            parse_reply("n too risky"),
            HumanReply::Reject(Some("too risky".to_string()))
        );
        assert_eq!(parse_reply("EXIT"), HumanReply::Exit);
        assert_eq!(
            parse_reply("use read_file first"),
            HumanReply::Feedback("use read_file first".to_string())
        );
        assert!(matches!(parse_reply(""), HumanReply::Invalid(_)));
        assert!(matches!(parse_reply("y -0"), HumanReply::Invalid(_)));
        assert!(matches!(parse_reply("y -x"), HumanReply::Invalid(_)));
    }

    #[test]
    fn words_starting_with_n_are_feedback() {
        assert_eq!(
            parse_reply("no way, try again"),
            HumanReply::Feedback("no way, try again".to_string())
        );
    }

    #[test]
    fn autonomous_never_asks() {
        let mut state = ConfirmationState::new(GateMode::Autonomous, 0);
        for _ in 0..5 {
            assert_eq!(state.begin_cycle(), Precheck::Dispatch);
        }
        assert_eq!(state.phase(), GatePhase::Autonomous);
    }

    #[test]
    fn approve_many_auto_dispatches_exactly_n_cycles() {
        let mut state = ConfirmationState::new(GateMode::Interactive, 0);
        assert_eq!(state.begin_cycle(), Precheck::Ask);
        assert_eq!(
            state.apply("write_file", &HumanReply::ApproveMany(3)),
            Some(GateDecision::Dispatch)
        );
        assert_eq!(state.phase(), GatePhase::AutoN(3));

        for _ in 0..3 {
            assert_eq!(state.begin_cycle(), Precheck::Dispatch);
        }
        assert_eq!(state.phase(), GatePhase::Ask);
        assert_eq!(state.begin_cycle(), Precheck::Ask);
    }

    #[test]
    fn single_approval_stays_in_ask() {
        let mut state = ConfirmationState::new(GateMode::Interactive, 0);
        state.begin_cycle();
        assert_eq!(
            state.apply("finish", &HumanReply::Approve),
            Some(GateDecision::Dispatch)
        );
        assert_eq!(state.begin_cycle(), Precheck::Ask);
    }

    #[test]
    fn rejection_and_feedback_withhold_dispatch() {
        let mut state = ConfirmationState::new(GateMode::Interactive, 0);
        assert_eq!(
            state.apply("write_file", &HumanReply::Reject(Some("wrong path".into()))),
            Some(GateDecision::Withhold {
                observation: "Human rejected command 'write_file'. Reason: wrong path"
                    .to_string()
            })
        );
        assert_eq!(
            state.apply("write_file", &HumanReply::Feedback("write to out/".into())),
            Some(GateDecision::Withhold {
                observation: "Human feedback: write to out/".to_string()
            })
        );
        assert_eq!(state.apply("x", &HumanReply::Invalid("e".into())), None);
        assert_eq!(state.apply("x", &HumanReply::Exit), Some(GateDecision::Exit));
    }
}
