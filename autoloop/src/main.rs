//! Autonomous agent loop CLI.
//!
//! `autoloop init` scaffolds `autoloop.toml` and `profile.toml`; `autoloop run`
//! drives the agent loop against the configured model service until a
//! terminal state; `autoloop check` validates a saved model reply.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use autoloop::commands::CommandRegistry;
use autoloop::commands::builtin::register_builtins;
use autoloop::core::gate::{ConfirmationState, GateMode};
use autoloop::core::interpret::ResponseInterpreter;
use autoloop::core::types::{CycleEvent, LoopReport};
use autoloop::exit_codes;
use autoloop::hooks::HookChain;
use autoloop::io::config::{AutoloopConfig, CONFIG_FILE, load_config};
use autoloop::io::console::StdinChannel;
use autoloop::io::cycle_log::{CycleLog, generate_run_id, validate_id};
use autoloop::io::gateway::ModelGateway;
use autoloop::io::init::{InitOptions, init_workspace};
use autoloop::io::model_process::CommandModelService;
use autoloop::io::profile::{PROFILE_FILE, load_profile};
use autoloop::io::prompt::PromptEngine;
use autoloop::logging;
use autoloop::looping::{LoopController, LoopSettings, Prompts};
use autoloop::memory::InMemoryStore;

#[derive(Parser)]
#[command(
    name = "autoloop",
    version,
    about = "Autonomous agent loop with budget and human confirmation controls"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `autoloop.toml` and a starter `profile.toml`.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
        /// Workspace directory.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
    /// Run the agent loop until a terminal state.
    Run(RunArgs),
    /// Validate a saved model reply and print the parsed action.
    Check {
        /// File holding the raw reply text.
        reply_file: PathBuf,
    },
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Config file (default: `<workdir>/autoloop.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Agent profile (default: `<workdir>/profile.toml`).
    #[arg(long)]
    profile: Option<PathBuf>,
    /// Workspace directory; file commands are confined to it.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,
    /// Dispatch every action without asking.
    #[arg(long, conflicts_with = "auto")]
    continuous: bool,
    /// Auto-approve the first N actions, then ask.
    #[arg(long, value_name = "N")]
    auto: Option<u32>,
    /// Stop after N cycles.
    #[arg(long, value_name = "N")]
    max_cycles: Option<u32>,
    /// Run id (default: `run-<unix seconds>`).
    #[arg(long)]
    run_id: Option<String>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, workdir } => cmd_init(&workdir, force),
        Command::Run(args) => cmd_run(&args),
        Command::Check { reply_file } => cmd_check(&reply_file),
    }
}

fn cmd_init(workdir: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(workdir, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    println!("wrote {}", paths.profile_path.display());
    Ok(exit_codes::OK)
}

fn cmd_check(reply_file: &Path) -> Result<i32> {
    let raw = fs::read_to_string(reply_file)
        .with_context(|| format!("read {}", reply_file.display()))?;
    let interpreter = ResponseInterpreter::new()?;
    match interpreter.parse(&raw) {
        Ok(action) => {
            println!("{}", serde_json::to_string_pretty(&action)?);
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{}", err.corrective_instruction());
            Ok(exit_codes::INVALID)
        }
    }
}

/// Apply command-line overrides on top of the loaded config.
fn effective_config(mut cfg: AutoloopConfig, args: &RunArgs) -> Result<AutoloopConfig> {
    if args.continuous {
        cfg.confirmation.mode = GateMode::Autonomous;
    }
    if let Some(n) = args.auto {
        cfg.confirmation.mode = GateMode::Interactive;
        cfg.confirmation.auto_approvals = n;
    }
    if args.max_cycles.is_some() {
        cfg.max_cycles = args.max_cycles;
    }
    cfg.validate().context("invalid config after command-line overrides")?;
    Ok(cfg)
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let workdir = &args.workdir;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| workdir.join(CONFIG_FILE));
    let profile_path = args
        .profile
        .clone()
        .unwrap_or_else(|| workdir.join(PROFILE_FILE));

    let cfg = effective_config(load_config(&config_path)?, args)?;
    let profile = load_profile(&profile_path)?;
    let model = cfg.model_info()?;
    if !profile.plugin_names.is_empty() {
        warn!(plugins = ?profile.plugin_names, "plugin loading is not supported; ignoring");
    }

    let mut registry = CommandRegistry::new();
    register_builtins(&mut registry, workdir)?;
    let engine = PromptEngine::new()?;
    let prompts = Prompts {
        system: engine.render_system(&profile, profile.budget_ceiling)?,
        constraints: engine.render_constraints(&cfg.constraints, &registry)?,
    };

    let log_dir = workdir.join(&cfg.log_dir);
    let run_id = match &args.run_id {
        Some(id) => {
            validate_id(id)?;
            id.clone()
        }
        None => generate_run_id(&log_dir)?,
    };
    let cycle_log = CycleLog::new(&log_dir, &run_id)?;
    println!("run {run_id}: logging to {}", cycle_log.run_dir().display());

    let service = CommandModelService {
        command: cfg.service.command.clone(),
        workdir: workdir.clone(),
        timeout: Duration::from_secs(cfg.request_timeout_secs),
        output_limit_bytes: cfg.service.output_limit_bytes,
    };
    let hooks = HookChain::new();
    let gateway = ModelGateway::new(service, &hooks, cfg.retry, cfg.temperature);

    let report = LoopController::new(
        LoopSettings::from_config(&cfg),
        prompts,
        model,
        gateway,
        &registry,
        StdinChannel::new(),
    )?
    .with_budget(profile.budget_ceiling)
    .with_gate(ConfirmationState::new(
        cfg.confirmation.mode,
        cfg.confirmation.auto_approvals,
    ))
    .with_memory(Box::new(InMemoryStore::new()))
    .with_cycle_log(cycle_log)
    .run(print_event)?;

    print_report(&report);
    Ok(exit_codes::for_terminal(report.terminal_state))
}

fn print_event(event: &CycleEvent) {
    let command = event.command.as_deref().unwrap_or("-");
    println!(
        "[cycle {}] {command} (spent {}): {}",
        event.cycle_index, event.cumulative_spent, event.observation
    );
}

fn print_report(report: &LoopReport) {
    println!(
        "{}: {} ({} cycles, spent {})",
        report.terminal_state.as_str(),
        report.reason,
        report.cycle_count,
        report.total_spent
    );
}
