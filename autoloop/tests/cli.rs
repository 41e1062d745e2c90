//! CLI tests for `autoloop init`, `autoloop check` and `autoloop run`.
//!
//! Spawns the autoloop binary and verifies exit codes and on-disk artifacts.

use std::fs;
use std::process::{Command, Stdio};

use autoloop::exit_codes;
use autoloop::io::config::{AutoloopConfig, write_config};
use autoloop::io::cycle_log::report_path;
use autoloop::io::init::{InitOptions, WorkspacePaths, init_workspace};
use autoloop::test_support::action_reply;
use serde_json::json;

fn autoloop() -> Command {
    Command::new(env!("CARGO_BIN_EXE_autoloop"))
}

#[test]
fn init_twice_without_force_fails() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = autoloop()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("autoloop init");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(WorkspacePaths::new(temp.path()).config_path.is_file());

    let status = autoloop()
        .current_dir(temp.path())
        .arg("init")
        .stderr(Stdio::null())
        .status()
        .expect("autoloop init");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn check_accepts_a_fenced_reply() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("reply.txt");
    let reply = action_reply("finish", json!({"reason": "done"}));
    fs::write(&path, format!("Here you go:\n```json\n{reply}\n```\n")).expect("write reply");

    let output = autoloop()
        .arg("check")
        .arg(&path)
        .output()
        .expect("autoloop check");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let action: serde_json::Value = serde_json::from_slice(&output.stdout).expect("action json");
    assert_eq!(action["command"]["name"], "finish");
}

#[test]
fn check_reports_the_failing_field() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("reply.txt");
    fs::write(&path, r#"{"thought": "t", "reasoning": "r", "plan": [], "criticism": "c"}"#)
        .expect("write reply");

    let output = autoloop()
        .arg("check")
        .arg(&path)
        .output()
        .expect("autoloop check");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("`command`"), "{stderr}");
}

/// End to end with a shell model service that always answers `finish`.
#[cfg(unix)]
#[test]
fn run_completes_against_a_scripted_service() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");

    let body = json!({
        "content": action_reply("finish", json!({"reason": "nothing left to do"})),
        "usage": {"prompt_tokens": 120, "completion_tokens": 30},
        "cost": 0.002,
    });
    fs::write(temp.path().join("reply.json"), body.to_string()).expect("write reply");
    fs::write(
        temp.path().join("service.sh"),
        "cat > /dev/null\ncat reply.json\n",
    )
    .expect("write service");

    let cfg = AutoloopConfig {
        service: autoloop::io::config::ServiceConfig {
            command: vec!["sh".to_string(), "service.sh".to_string()],
            ..Default::default()
        },
        ..AutoloopConfig::default()
    };
    write_config(&paths.config_path, &cfg).expect("write config");

    let status = autoloop()
        .current_dir(temp.path())
        .args(["run", "--continuous", "--run-id", "e2e"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .expect("autoloop run");

    assert_eq!(status.code(), Some(exit_codes::OK));
    let report: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(report_path(&temp.path().join(&cfg.log_dir), "e2e"))
            .expect("read report"),
    )
    .expect("report json");
    assert_eq!(report["terminal_state"], "completed");
    assert_eq!(report["cycle_count"], 1);
}

#[cfg(unix)]
#[test]
fn run_exits_with_max_cycles_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");

    let body = json!({
        "content": action_reply("read_file", json!({"path": "profile.toml"})),
        "cost": 0.0,
    });
    fs::write(temp.path().join("reply.json"), body.to_string()).expect("write reply");
    fs::write(
        temp.path().join("service.sh"),
        "cat > /dev/null\ncat reply.json\n",
    )
    .expect("write service");
    let mut cfg = AutoloopConfig::default();
    cfg.service.command = vec!["sh".to_string(), "service.sh".to_string()];
    write_config(&paths.config_path, &cfg).expect("write config");

    let status = autoloop()
        .current_dir(temp.path())
        .args(["run", "--continuous", "--max-cycles", "2"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .expect("autoloop run");

    assert_eq!(status.code(), Some(exit_codes::MAX_CYCLES_REACHED));
}
