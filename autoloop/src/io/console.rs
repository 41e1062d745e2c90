//! Line-based human channel used by the confirmation gate.

use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

/// Result of asking the human a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Line(String),
    /// No answer arrived within the timeout.
    TimedOut,
    /// The input stream ended.
    Closed,
}

pub trait HumanChannel {
    /// Display text without waiting for input.
    fn show(&mut self, text: &str) -> Result<()>;

    /// Print `prompt` and wait for one line. `None` waits indefinitely.
    fn ask(&mut self, prompt: &str, timeout: Option<Duration>) -> Result<Answer>;
}

impl<C: HumanChannel + ?Sized> HumanChannel for &mut C {
    fn show(&mut self, text: &str) -> Result<()> {
        (**self).show(text)
    }

    fn ask(&mut self, prompt: &str, timeout: Option<Duration>) -> Result<Answer> {
        (**self).ask(prompt, timeout)
    }
}

/// Terminal channel: prompts on stdout, reads stdin on a background thread so
/// a pending prompt can time out.
pub struct StdinChannel {
    lines: Receiver<std::io::Result<String>>,
}

impl StdinChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines: rx }
    }
}

impl Default for StdinChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanChannel for StdinChannel {
    fn show(&mut self, text: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{text}").context("write to stdout")?;
        out.flush().context("flush stdout")
    }

    fn ask(&mut self, prompt: &str, timeout: Option<Duration>) -> Result<Answer> {
        {
            let mut out = std::io::stdout().lock();
            write!(out, "{prompt}").context("write prompt")?;
            out.flush().context("flush stdout")?;
        }
        let received = match timeout {
            Some(limit) => match self.lines.recv_timeout(limit) {
                Ok(line) => Some(line),
                Err(RecvTimeoutError::Timeout) => {
                    debug!(timeout_secs = limit.as_secs(), "confirmation prompt timed out");
                    return Ok(Answer::TimedOut);
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.lines.recv().ok(),
        };
        match received {
            Some(line) => Ok(Answer::Line(line.context("read stdin")?)),
            None => Ok(Answer::Closed),
        }
    }
}
