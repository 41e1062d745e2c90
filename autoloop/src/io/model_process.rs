//! Model service backed by an external program.
//!
//! The program receives one [`CompletionRequest`] as JSON on stdin and must
//! print one JSON reply on stdout, either
//! `{"content": "...", "usage": {...}, "cost": 0.01}` or
//! `{"error": {"kind": "rate_limit", "detail": "..."}}`.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::cost::Cost;
use crate::io::gateway::{
    Completion, CompletionRequest, FailureKind, ModelService, ServiceError, Usage,
};
use crate::io::process::run_with_timeout;

#[derive(Debug, Clone)]
pub struct CommandModelService {
    /// Program and arguments, e.g. `["python3", "model_service.py"]`.
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct ServiceReply {
    content: Option<String>,
    #[serde(default)]
    usage: Usage,
    cost: Option<Cost>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    kind: FailureKind,
    #[serde(default)]
    detail: String,
    usage: Option<Usage>,
}

impl ModelService for CommandModelService {
    #[instrument(skip_all, fields(model = %request.model, timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ServiceError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(ServiceError::new(
                FailureKind::Malformed,
                "service.command is empty",
            ));
        };
        let payload = serde_json::to_vec(request).map_err(|e| {
            ServiceError::new(FailureKind::Malformed, format!("serialize request: {e}"))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_with_timeout(cmd, Some(payload), self.timeout, self.output_limit_bytes)
            .map_err(|e| ServiceError::new(FailureKind::Transport, format!("{e:#}")))?;

        if output.timed_out {
            return Err(ServiceError::new(
                FailureKind::Transport,
                format!("model service timed out after {}s", self.timeout.as_secs()),
            ));
        }

        let stdout = output.stdout_text();
        let reply = match serde_json::from_str::<ServiceReply>(stdout.trim()) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(exit_code = ?output.status.code(), err = %err, "unreadable model service reply");
                let detail = if output.status.success() {
                    format!("unreadable reply: {err}")
                } else {
                    format!(
                        "model service exited with status {:?}: {}",
                        output.status.code(),
                        output.stderr_summary()
                    )
                };
                return Err(ServiceError::new(FailureKind::Transport, detail));
            }
        };

        if let Some(error) = reply.error {
            debug!(kind = %error.kind, "model service reported failure");
            let mut failure = ServiceError::new(error.kind, error.detail);
            failure.billed = error.usage;
            return Err(failure);
        }
        let Some(content) = reply.content else {
            return Err(ServiceError::new(
                FailureKind::Transport,
                "reply has neither content nor error",
            ));
        };
        Ok(Completion {
            content,
            usage: reply.usage,
            cost: reply.cost,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::io::gateway::WireMessage;

    fn service(script: &str, dir: &std::path::Path) -> CommandModelService {
        CommandModelService {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            workdir: dir.to_path_buf(),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4".to_string(),
            messages: vec![WireMessage {
                role: Role::User,
                content: "hi".to_string(),
            }],
            temperature: 0.0,
            max_tokens: 100,
        }
    }

    #[test]
    fn parses_successful_reply() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = r#"cat > request.json; printf '{"content":"hello","usage":{"prompt_tokens":3,"completion_tokens":1},"cost":0.5}'"#;
        let completion = service(script, temp.path())
            .complete(&request())
            .expect("complete");
        assert_eq!(completion.content, "hello");
        assert_eq!(completion.usage.prompt_tokens, 3);
        assert_eq!(completion.cost, Some(Cost::from_dollars(0.5)));

        let sent = std::fs::read_to_string(temp.path().join("request.json")).expect("request");
        assert!(sent.contains("\"role\":\"user\""));
        assert!(sent.contains("\"max_tokens\":100"));
    }

    #[test]
    fn maps_error_envelope_to_typed_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = r#"cat >/dev/null; printf '{"error":{"kind":"auth","detail":"invalid key"}}'"#;
        let err = service(script, temp.path()).complete(&request()).unwrap_err();
        assert_eq!(err.kind, FailureKind::Auth);
        assert_eq!(err.detail, "invalid key");
    }

    #[test]
    fn crash_is_transport_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = service("cat >/dev/null; echo boom >&2; exit 3", temp.path())
            .complete(&request())
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Transport);
        assert!(err.detail.contains("boom"));
    }
}
