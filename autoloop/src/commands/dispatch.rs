//! Command dispatch with error containment.
//!
//! Every path through [`dispatch`] yields text for the model: unknown names,
//! malformed arguments, handler errors and handler panics all become
//! observations, and the panic hook stays quiet while a handler runs. Only a
//! successful call to a [`CommandKind::Terminal`] command reports
//! [`DispatchOutcome::Finished`].

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe, catch_unwind};
use std::sync::Once;

use tracing::{debug, warn};

use super::{CommandKind, CommandRegistry};
use crate::core::types::CommandCall;

thread_local! {
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
}

static QUIET_PANICS: Once = Once::new();

/// Wrap the process panic hook so handler panics on this thread are not
/// printed; they are reported as observations instead.
fn install_panic_hook() {
    QUIET_PANICS.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !IN_HANDLER.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Observation(String),
    /// A terminal command succeeded; the loop ends with COMPLETED.
    Finished(String),
}

impl DispatchOutcome {
    pub fn observation(&self) -> &str {
        match self {
            DispatchOutcome::Observation(text) | DispatchOutcome::Finished(text) => text,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, DispatchOutcome::Finished(_))
    }
}

pub fn dispatch(call: &CommandCall, registry: &CommandRegistry) -> DispatchOutcome {
    let name = call.name.as_str();
    let Some(spec) = registry.get(name) else {
        debug!(command = name, "unknown command");
        return DispatchOutcome::Observation(format!(
            "Unknown command '{name}'. Available commands: {}",
            registry.names().join(", ")
        ));
    };

    let missing: Vec<&str> = spec
        .parameter_names
        .iter()
        .filter(|p| !call.args.contains_key(p.as_str()))
        .map(String::as_str)
        .collect();
    let unexpected: Vec<&str> = call
        .args
        .keys()
        .filter(|k| !spec.parameter_names.contains(k.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("missing: {}", missing.join(", ")));
        }
        if !unexpected.is_empty() {
            parts.push(format!("unexpected: {}", unexpected.join(", ")));
        }
        debug!(command = name, detail = %parts.join("; "), "invalid arguments");
        return DispatchOutcome::Observation(format!(
            "Invalid arguments for '{name}': {}",
            parts.join("; ")
        ));
    }

    let handler = spec.handler();
    install_panic_hook();
    IN_HANDLER.with(|flag| flag.set(true));
    let result = catch_unwind(AssertUnwindSafe(|| handler.call(&call.args)));
    IN_HANDLER.with(|flag| flag.set(false));
    match result {
        Ok(Ok(text)) => {
            let observation = format!("Command '{name}' returned: {text}");
            match spec.kind {
                CommandKind::Terminal => DispatchOutcome::Finished(observation),
                CommandKind::Action => DispatchOutcome::Observation(observation),
            }
        }
        Ok(Err(err)) => {
            warn!(command = name, err = %format!("{err:#}"), "command failed");
            DispatchOutcome::Observation(format!("Command '{name}' failed: {err:#}"))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(command = name, %message, "command panicked");
            DispatchOutcome::Observation(format!("Command '{name}' failed: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
