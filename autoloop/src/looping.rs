//! The agent loop: build prompt, invoke model, parse, confirm, dispatch, record.
//!
//! [`LoopController`] exclusively owns the budget, the confirmation state and
//! the authoritative cycle log for one run. It stops on the first terminal
//! state and returns a [`LoopReport`]; only I/O failures while writing the
//! cycle log surface as `Err`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::commands::CommandRegistry;
use crate::commands::dispatch::dispatch;
use crate::core::budget::BudgetTracker;
use crate::core::context::{ContextBuilder, ContextRequest};
use crate::core::cost::Cost;
use crate::core::gate::{
    ConfirmationState, GateDecision, GateMode, HumanReply, Precheck, parse_reply,
    rejection_observation,
};
use crate::core::interpret::ResponseInterpreter;
use crate::core::tokens::{HeuristicTokenCounter, ModelInfo, TokenCounter};
use crate::core::types::{
    ChatSequence, CycleEvent, CycleRecord, LoopReport, ParsedAction, TerminalState,
};
use crate::io::config::AutoloopConfig;
use crate::io::console::{Answer, HumanChannel};
use crate::io::cycle_log::{CycleLog, CycleMeta};
use crate::io::gateway::{ModelGateway, ModelService};
use crate::io::prompt::TRIGGER_PROMPT;
use crate::memory::MemoryStore;

const CONFIRM_PROMPT: &str = "Enter 'y' to authorise command, 'y -N' to run N continuous commands, \
'n' to reject, 'EXIT' to exit, or enter feedback for the assistant: ";

/// Loop limits, derived from [`AutoloopConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_cycles: Option<u32>,
    pub max_parse_attempts: u32,
    pub max_failed_cycles: u32,
    pub confirmation_timeout: Option<Duration>,
    pub memory_results: usize,
}

impl LoopSettings {
    pub fn from_config(cfg: &AutoloopConfig) -> Self {
        Self {
            max_cycles: cfg.max_cycles,
            max_parse_attempts: cfg.max_parse_attempts.max(1),
            max_failed_cycles: cfg.max_failed_cycles.max(1),
            confirmation_timeout: (cfg.confirmation_timeout_secs > 0)
                .then(|| Duration::from_secs(cfg.confirmation_timeout_secs)),
            memory_results: cfg.memory_results,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&AutoloopConfig::default())
    }
}

/// Rendered required turns of every prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system: String,
    pub constraints: String,
}

enum CycleEnd {
    Continue,
    Stop(TerminalState, String),
}

/// Per-cycle scratch state while the model is being queried.
struct CycleDraft {
    index: u32,
    attempts: u32,
    cost: Cost,
    /// Most recent unusable reply, kept so an abandoned cycle can be recorded.
    last_reply: Option<(ChatSequence, String)>,
}

pub struct LoopController<'a, S: ModelService, H: HumanChannel> {
    settings: LoopSettings,
    prompts: Prompts,
    model: ModelInfo,
    gateway: ModelGateway<'a, S>,
    interpreter: ResponseInterpreter,
    registry: &'a CommandRegistry,
    counter: Box<dyn TokenCounter + 'a>,
    channel: H,
    memory: Option<Box<dyn MemoryStore + 'a>>,
    cycle_log: Option<CycleLog>,
    stop: Arc<AtomicBool>,
    budget: BudgetTracker,
    gate: ConfirmationState,
    log: Vec<CycleRecord>,
    failed_cycles: u32,
    last_call_cost: Cost,
}

impl<'a, S: ModelService, H: HumanChannel> LoopController<'a, S, H> {
    pub fn new(
        settings: LoopSettings,
        prompts: Prompts,
        model: ModelInfo,
        gateway: ModelGateway<'a, S>,
        registry: &'a CommandRegistry,
        channel: H,
    ) -> Result<Self> {
        Ok(Self {
            settings,
            prompts,
            model,
            gateway,
            interpreter: ResponseInterpreter::new()?,
            registry,
            counter: Box::new(HeuristicTokenCounter),
            channel,
            memory: None,
            cycle_log: None,
            stop: Arc::new(AtomicBool::new(false)),
            budget: BudgetTracker::new(Cost::ZERO),
            gate: ConfirmationState::new(GateMode::Autonomous, 0),
            log: Vec::new(),
            failed_cycles: 0,
            last_call_cost: Cost::ZERO,
        })
    }

    /// Spending ceiling; zero means unlimited.
    pub fn with_budget(mut self, ceiling: Cost) -> Self {
        self.budget = BudgetTracker::new(ceiling);
        self
    }

    pub fn with_gate(mut self, gate: ConfirmationState) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_memory(mut self, memory: Box<dyn MemoryStore + 'a>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_cycle_log(mut self, log: CycleLog) -> Self {
        self.cycle_log = Some(log);
        self
    }

    /// Raise to stop the loop before the next cycle starts.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run cycles until a terminal state, reporting each cycle to `on_cycle`.
    #[instrument(skip_all, fields(model = %self.model.name))]
    pub fn run<F: FnMut(&CycleEvent)>(mut self, mut on_cycle: F) -> Result<LoopReport> {
        info!(
            ceiling = %self.budget.ceiling(),
            mode = ?self.gate.mode,
            "starting agent loop"
        );
        let (terminal_state, reason) = loop {
            if self.stop.load(Ordering::SeqCst) {
                let reason = "stop requested".to_string();
                self.announce(TerminalState::UserAbort, &reason, &mut on_cycle);
                break (TerminalState::UserAbort, reason);
            }
            if let Some(max) = self.settings.max_cycles
                && self.log.len() >= max as usize
            {
                let reason = format!("reached the limit of {max} cycles");
                self.announce(TerminalState::MaxCyclesReached, &reason, &mut on_cycle);
                break (TerminalState::MaxCyclesReached, reason);
            }
            if let CycleEnd::Stop(state, reason) = self.run_cycle(&mut on_cycle)? {
                break (state, reason);
            }
        };

        info!(
            state = terminal_state.as_str(),
            cycles = self.log.len(),
            spent = %self.budget.spent(),
            %reason,
            "agent loop finished"
        );
        let report = LoopReport {
            terminal_state,
            reason,
            cycle_count: self.log.len() as u32,
            total_spent: self.budget.spent(),
            last_observation: self.log.last().map(|r| r.observation.clone()),
            log: self.log,
        };
        if let Some(log) = &self.cycle_log {
            log.write_report(&report)?;
        }
        Ok(report)
    }

    fn run_cycle<F: FnMut(&CycleEvent)>(&mut self, on_cycle: &mut F) -> Result<CycleEnd> {
        let memories = self.recall();
        let mut draft = CycleDraft {
            index: self.log.len() as u32,
            attempts: 0,
            cost: Cost::ZERO,
            last_reply: None,
        };
        let mut final_turn = TRIGGER_PROMPT.to_string();

        let (sequence, raw_reply, parsed) = loop {
            draft.attempts += 1;
            let sequence = ContextBuilder::new(self.counter.as_ref()).build(
                &ContextRequest {
                    system_prompt: &self.prompts.system,
                    constraints: &self.prompts.constraints,
                    history: &self.log,
                    latest_observation: &final_turn,
                    memories: &memories,
                },
                &self.model,
            );
            if let Some(overflow) = sequence.overflow {
                let reason = format!(
                    "context overflow: required turns need {} tokens but {} accepts {}",
                    overflow.required_tokens, self.model.name, overflow.capacity
                );
                return self.abandon(draft, TerminalState::UnrecoverableError, reason, on_cycle);
            }

            let estimate = self
                .model
                .estimate_cost(sequence.prompt_tokens, sequence.reserved_completion)
                .max(self.last_call_cost);
            if let Err(exceeded) = self.budget.precheck(estimate) {
                debug!(remaining = ?self.budget.remaining(), %estimate, "precheck refused the call");
                return self.abandon(
                    draft,
                    TerminalState::BudgetExceeded,
                    exceeded.to_string(),
                    on_cycle,
                );
            }

            let invocation = match self.gateway.invoke(&sequence, &self.model) {
                Ok(invocation) => invocation,
                Err(failure) => {
                    draft.cost += failure.billed;
                    if self.budget.charge(failure.billed).is_err() {
                        debug!("failed call pushed spend past the ceiling");
                    }
                    return self.abandon(
                        draft,
                        TerminalState::UnrecoverableError,
                        failure.to_string(),
                        on_cycle,
                    );
                }
            };
            draft.cost += invocation.cost;
            self.last_call_cost = invocation.cost;
            let parsed = self.interpreter.parse(&invocation.content);

            if let Err(exceeded) = self.budget.charge(invocation.cost) {
                let reason = exceeded.to_string();
                let record = CycleRecord {
                    index: draft.index,
                    sequence_sent: sequence,
                    raw_reply: invocation.content,
                    action: parsed.ok(),
                    observation: format!("Not dispatched: {reason}"),
                    cost: draft.cost,
                    parse_attempts: draft.attempts,
                };
                self.record(record, false, Some(TerminalState::BudgetExceeded), on_cycle)?;
                return Ok(CycleEnd::Stop(TerminalState::BudgetExceeded, reason));
            }

            match parsed {
                Ok(action) => break (sequence, invocation.content, Ok(action)),
                Err(err) if draft.attempts >= self.settings.max_parse_attempts => {
                    warn!(
                        cycle = draft.index,
                        attempts = draft.attempts,
                        field = err.field(),
                        "parse attempts exhausted, aborting cycle"
                    );
                    break (sequence, invocation.content, Err(err));
                }
                Err(err) => {
                    warn!(
                        cycle = draft.index,
                        attempt = draft.attempts,
                        field = err.field(),
                        "unusable reply, sending corrective instruction"
                    );
                    final_turn = err.corrective_instruction();
                    draft.last_reply = Some((sequence, invocation.content));
                }
            }
        };

        let action = match parsed {
            Ok(action) => action,
            Err(err) => {
                self.failed_cycles += 1;
                let terminal = (self.failed_cycles >= self.settings.max_failed_cycles)
                    .then_some(TerminalState::UnrecoverableError);
                let record = CycleRecord {
                    index: draft.index,
                    sequence_sent: sequence,
                    raw_reply,
                    action: None,
                    observation: format!(
                        "No action taken: the reply could not be used after {} attempt(s): {err}",
                        draft.attempts
                    ),
                    cost: draft.cost,
                    parse_attempts: draft.attempts,
                };
                self.record(record, false, terminal, on_cycle)?;
                return Ok(match terminal {
                    Some(state) => CycleEnd::Stop(
                        state,
                        format!(
                            "{} consecutive cycles produced no usable action",
                            self.failed_cycles
                        ),
                    ),
                    None => CycleEnd::Continue,
                });
            }
        };
        self.failed_cycles = 0;

        let decision = match self.gate.begin_cycle() {
            Precheck::Dispatch => GateDecision::Dispatch,
            Precheck::Ask => self.confirm(&action)?,
        };
        let dispatched = decision == GateDecision::Dispatch;
        let (observation, terminal) = match decision {
            GateDecision::Dispatch => {
                let outcome = dispatch(&action.command, self.registry);
                let terminal = outcome.is_finished().then_some(TerminalState::Completed);
                (outcome.observation().to_string(), terminal)
            }
            GateDecision::Withhold { observation } => {
                self.channel.show(&observation)?;
                (observation, None)
            }
            GateDecision::Exit => (
                format!(
                    "Human requested exit; command '{}' was not dispatched.",
                    action.command.name
                ),
                Some(TerminalState::UserAbort),
            ),
        };

        let reason = match terminal {
            Some(TerminalState::Completed) => observation.clone(),
            Some(_) => "human sent EXIT".to_string(),
            None => String::new(),
        };
        let record = CycleRecord {
            index: draft.index,
            sequence_sent: sequence,
            raw_reply,
            action: Some(action),
            observation,
            cost: draft.cost,
            parse_attempts: draft.attempts,
        };
        self.record(record, dispatched, terminal, on_cycle)?;
        Ok(match terminal {
            Some(state) => CycleEnd::Stop(state, reason),
            None => CycleEnd::Continue,
        })
    }

    fn confirm(&mut self, action: &ParsedAction) -> Result<GateDecision> {
        self.channel.show(&describe_action(action))?;
        let command = action.command.name.as_str();
        loop {
            match self
                .channel
                .ask(CONFIRM_PROMPT, self.settings.confirmation_timeout)?
            {
                Answer::Line(line) => {
                    let reply = parse_reply(&line);
                    if let Some(decision) = self.gate.apply(command, &reply) {
                        debug!(?reply, "confirmation answered");
                        return Ok(decision);
                    }
                    if let HumanReply::Invalid(why) = reply {
                        self.channel.show(&format!("Invalid input: {why}"))?;
                    }
                }
                Answer::TimedOut => {
                    warn!(command, "confirmation timed out; not dispatching");
                    return Ok(GateDecision::Withhold {
                        observation: rejection_observation(
                            command,
                            Some("no confirmation before the timeout"),
                        ),
                    });
                }
                Answer::Closed => return Ok(GateDecision::Exit),
            }
        }
    }

    /// End the run mid-cycle. A cycle that already received a reply is recorded.
    fn abandon<F: FnMut(&CycleEvent)>(
        &mut self,
        draft: CycleDraft,
        state: TerminalState,
        reason: String,
        on_cycle: &mut F,
    ) -> Result<CycleEnd> {
        match draft.last_reply {
            Some((sequence, raw_reply)) => {
                let record = CycleRecord {
                    index: draft.index,
                    sequence_sent: sequence,
                    raw_reply,
                    action: None,
                    observation: format!("Cycle abandoned: {reason}"),
                    cost: draft.cost,
                    parse_attempts: draft.attempts.saturating_sub(1),
                };
                self.record(record, false, Some(state), on_cycle)?;
            }
            None => self.announce(state, &reason, on_cycle),
        }
        Ok(CycleEnd::Stop(state, reason))
    }

    fn record<F: FnMut(&CycleEvent)>(
        &mut self,
        record: CycleRecord,
        dispatched: bool,
        terminal: Option<TerminalState>,
        on_cycle: &mut F,
    ) -> Result<()> {
        let spent = self.budget.spent();
        info!(
            cycle = record.index,
            command = record.command_name().unwrap_or("-"),
            parse_attempts = record.parse_attempts,
            cost = %record.cost,
            %spent,
            "cycle recorded"
        );
        if let Some(log) = &self.cycle_log {
            let meta = CycleMeta {
                run_id: log.run_id().to_string(),
                index: record.index,
                command: record.command_name().map(str::to_string),
                parse_attempts: record.parse_attempts,
                cost: record.cost,
                cumulative_spent: spent,
                dispatched,
                terminal,
            };
            log.write_cycle(&record, &meta)?;
        }
        self.remember(&record);
        on_cycle(&CycleEvent {
            cycle_index: record.index,
            command: record.command_name().map(str::to_string),
            observation: record.observation.clone(),
            cumulative_spent: spent,
            terminal,
        });
        self.log.push(record);
        Ok(())
    }

    /// Terminal notification for a run that ends without recording a cycle.
    fn announce<F: FnMut(&CycleEvent)>(&self, state: TerminalState, reason: &str, on_cycle: &mut F) {
        on_cycle(&CycleEvent {
            cycle_index: self.log.len() as u32,
            command: None,
            observation: reason.to_string(),
            cumulative_spent: self.budget.spent(),
            terminal: Some(state),
        });
    }

    fn recall(&self) -> Vec<String> {
        let (Some(memory), Some(last)) = (&self.memory, self.log.last()) else {
            return Vec::new();
        };
        if self.settings.memory_results == 0 {
            return Vec::new();
        }
        match memory.retrieve(&last.observation, self.settings.memory_results) {
            Ok(found) => found,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "memory retrieval failed");
                Vec::new()
            }
        }
    }

    fn remember(&mut self, record: &CycleRecord) {
        let Some(memory) = self.memory.as_mut() else {
            return;
        };
        let text = format!(
            "Assistant Reply: {}\nResult: {}",
            record.action_summary(),
            record.observation
        );
        if let Err(err) = memory.put(&text) {
            warn!(err = %format!("{err:#}"), "memory put failed");
        }
    }
}

/// Human-facing rendering of a proposed action.
pub fn describe_action(action: &ParsedAction) -> String {
    let mut text = format!(
        "THOUGHTS: {}\nREASONING: {}\n",
        action.thought, action.reasoning
    );
    if !action.plan.is_empty() {
        text.push_str("PLAN:\n");
        for step in &action.plan {
            text.push_str(&format!("- {step}\n"));
        }
    }
    text.push_str(&format!(
        "CRITICISM: {}\nNEXT ACTION: COMMAND = {} ARGUMENTS = {}",
        action.criticism,
        action.command.name,
        serde_json::Value::Object(action.command.args.clone())
    ));
    text
}
