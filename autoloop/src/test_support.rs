//! Test-only doubles for the model service, the human channel and commands.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::commands::builtin::{FINISH, Finish};
use crate::commands::{Args, CommandHandler, CommandKind, CommandRegistry};
use crate::core::cost::Cost;
use crate::io::console::{Answer, HumanChannel};
use crate::io::gateway::{
    Completion, CompletionRequest, FailureKind, ModelService, ServiceError, Usage,
};

/// Model service that replays a fixed queue and records every request.
///
/// Once the queue is empty every call fails with a non-retryable error, so a
/// test that over-runs its script ends quickly.
pub struct ScriptedModel {
    replies: RefCell<VecDeque<Result<Completion, ServiceError>>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<Completion, ServiceError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Successful completion with an explicit cost in dollars.
    pub fn reply(content: &str, dollars: f64) -> Result<Completion, ServiceError> {
        Ok(Completion {
            content: content.to_string(),
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
            },
            cost: Some(Cost::from_dollars(dollars)),
        })
    }

    pub fn failure(kind: FailureKind, detail: &str) -> Result<Completion, ServiceError> {
        Err(ServiceError::new(kind, detail))
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }

    /// Content of the final message of the `n`th request.
    pub fn final_turn(&self, n: usize) -> Option<String> {
        self.requests
            .borrow()
            .get(n)
            .and_then(|r| r.messages.last())
            .map(|m| m.content.clone())
    }
}

impl ModelService for ScriptedModel {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ServiceError> {
        self.requests.borrow_mut().push(request.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::new(FailureKind::Auth, "script exhausted")))
    }
}

/// Human channel fed from a queue of answers; `Closed` once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    answers: VecDeque<Answer>,
    pub shown: Vec<String>,
    pub asked: usize,
}

impl ScriptedChannel {
    pub fn with_lines(lines: &[&str]) -> Self {
        Self::with_answers(lines.iter().map(|l| Answer::Line(l.to_string())).collect())
    }

    pub fn with_answers(answers: Vec<Answer>) -> Self {
        Self {
            answers: answers.into(),
            ..Self::default()
        }
    }
}

impl HumanChannel for ScriptedChannel {
    fn show(&mut self, text: &str) -> Result<()> {
        self.shown.push(text.to_string());
        Ok(())
    }

    fn ask(&mut self, _prompt: &str, _timeout: Option<Duration>) -> Result<Answer> {
        self.asked += 1;
        Ok(self.answers.pop_front().unwrap_or(Answer::Closed))
    }
}

/// Handler that records its arguments and returns a fixed reply.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    calls: Rc<RefCell<Vec<Args>>>,
}

impl RecordingHandler {
    pub fn calls(&self) -> Vec<Args> {
        self.calls.borrow().clone()
    }
}

impl CommandHandler for RecordingHandler {
    fn call(&self, args: &Args) -> Result<String> {
        self.calls.borrow_mut().push(args.clone());
        Ok("noted".to_string())
    }
}

/// Registry with `finish{reason}` and a recording `note{text}` command.
pub fn finish_registry() -> (CommandRegistry, RecordingHandler) {
    let recorder = RecordingHandler::default();
    let mut registry = CommandRegistry::new();
    registry
        .register(
            FINISH,
            "Signal that all goals are complete.",
            &["reason"],
            CommandKind::Terminal,
            Finish,
        )
        .expect("register finish");
    registry
        .register(
            "note",
            "Record a note.",
            &["text"],
            CommandKind::Action,
            recorder.clone(),
        )
        .expect("register note");
    (registry, recorder)
}

/// Well-formed action reply invoking `command` with `args`.
pub fn action_reply(command: &str, args: Value) -> String {
    json!({
        "thought": format!("I should run {command}"),
        "reasoning": "it moves the goal forward",
        "plan": ["run the command", "check the result"],
        "criticism": "none",
        "command": {"name": command, "args": args},
    })
    .to_string()
}

/// Temporary workspace directory with a log dir beneath it.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.path().join(".autoloop").join("runs")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
