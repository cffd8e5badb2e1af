use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use expensely_cli::commands::simulate::SimulateOptions;
use expensely_cli::commands::{config, migrate, rule_check, simulate};
use expensely_core::approvals::RequiredApproverPolicy;
use serde_json::Value;
use tempfile::TempDir;

const HYBRID_RULE: &str = r#"
id = "RULE-SIM"
description = "Hardware purchases"
target_user_id = "emp-1"
rule_type = "HYBRID"
minimum_approval_percentage = 60

[[approvers]]
approver_id = "a"
is_required = true

[[approvers]]
approver_id = "b"

[[approvers]]
approver_id = "c"
is_specific = true
"#;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("EXPENSELY_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("EXPENSELY_DATABASE_URL", "postgres://elsewhere/expensely")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_env_and_default_sources() {
    with_env(&[("EXPENSELY_LOG_LEVEL", "debug")], || {
        let output = config::run();

        assert!(output.starts_with("effective config"));
        assert!(output.contains("- logging.level = debug (source: env (EXPENSELY_LOG_LEVEL))"));
        assert!(output.contains("- approvals.required_approver_policy = VetoOnly (source: default)"));
        assert!(output.contains("- approvals.max_commit_attempts = 3 (source: default)"));
    });
}

#[test]
fn rule_check_accepts_valid_toml_rule() {
    let dir = TempDir::new().expect("temp dir");
    let rule = write_file(&dir, "rule.toml", HYBRID_RULE);

    let result = rule_check::run(&rule);
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "rule-check");
    assert_eq!(payload["status"], "ok");
    let message = payload["message"].as_str().unwrap_or_default();
    assert!(message.contains("rule `RULE-SIM` is valid"));
    assert!(message.contains("1 required, 1 specific"));
}

#[test]
fn rule_check_accepts_json_rule() {
    let dir = TempDir::new().expect("temp dir");
    let rule = write_file(
        &dir,
        "rule.json",
        r#"{
            "description": "Meals",
            "target_user_id": "emp-2",
            "manager_id": "mgr-2",
            "is_manager_approver": true,
            "rule_type": "PERCENTAGE",
            "is_sequential": true,
            "approvers": [{"approver_id": "fin-1"}]
        }"#,
    );

    let result = rule_check::run(&rule);
    assert_eq!(result.exit_code, 0, "output: {}", result.output);
    let message = parse_payload(&result.output)["message"].as_str().unwrap_or_default().to_owned();
    assert!(message.contains("manager `mgr-2` decides first"));
    assert!(message.contains("minimum 100%"));
}

#[test]
fn rule_check_reports_invalid_rule() {
    let dir = TempDir::new().expect("temp dir");
    let rule = write_file(
        &dir,
        "rule.toml",
        r#"
description = "Broken"
target_user_id = "emp-1"
rule_type = "PERCENTAGE"
minimum_approval_percentage = 150

[[approvers]]
approver_id = "a"
"#,
    );

    let result = rule_check::run(&rule);
    assert_eq!(result.exit_code, 7);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["error_class"], "rule_validation");
    assert!(payload["message"].as_str().unwrap_or_default().contains("150"));
}

#[test]
fn rule_check_reports_unreadable_file() {
    let dir = TempDir::new().expect("temp dir");

    let result = rule_check::run(&dir.path().join("missing.toml"));
    assert_eq!(result.exit_code, 6);
    assert_eq!(parse_payload(&result.output)["error_class"], "input");
}

#[test]
fn simulate_specific_approver_completes_under_default_policy() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let rule = write_file(&dir, "rule.toml", HYBRID_RULE);
        let events =
            write_file(&dir, "events.json", r#"[{"approver_id": "c", "outcome": "approve"}]"#);

        let result = simulate::run(&rule, &events, SimulateOptions::default());
        assert_eq!(result.exit_code, 0, "output: {}", result.output);

        let lines: Vec<&str> = result.output.lines().collect();
        assert_eq!(lines.len(), 2);
        let step = parse_payload(lines[0]);
        assert_eq!(step["step"], 1);
        assert_eq!(step["status"], "APPROVED");
        assert_eq!(step["resolution"]["kind"], "specific_approval");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("APPROVED"));
    });
}

#[test]
fn simulate_hold_policy_waits_for_required_approver() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let rule = write_file(&dir, "rule.toml", HYBRID_RULE);
        let events = write_file(
            &dir,
            "events.toml",
            r#"
[[events]]
approver_id = "c"
outcome = "approve"

[[events]]
approver_id = "a"
outcome = "approve"
comment = "within budget"
"#,
        );

        let held_only = write_file(
            &dir,
            "held.json",
            r#"{"events": [{"approver_id": "c", "outcome": "approve"}]}"#,
        );
        let held = simulate::run(
            &rule,
            &held_only,
            SimulateOptions {
                policy: Some(RequiredApproverPolicy::HoldUntilDecided),
                manager_id: None,
            },
        );
        assert_eq!(held.exit_code, 0, "output: {}", held.output);
        assert_eq!(parse_payload(held.output.lines().next().unwrap_or_default())["status"], "PENDING");
        let message = parse_payload(last_line(&held.output))["message"]
            .as_str()
            .unwrap_or_default()
            .to_owned();
        assert!(message.contains("waiting on a,b"));

        let result = simulate::run(
            &rule,
            &events,
            SimulateOptions {
                policy: Some(RequiredApproverPolicy::HoldUntilDecided),
                manager_id: None,
            },
        );
        assert_eq!(result.exit_code, 0, "output: {}", result.output);
        let lines: Vec<&str> = result.output.lines().collect();
        assert_eq!(parse_payload(lines[1])["status"], "APPROVED");
        assert_eq!(parse_payload(lines[1])["resolution"]["approver_id"], "c");
    });
}

#[test]
fn simulate_reports_decisions_after_completion() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let rule = write_file(&dir, "rule.toml", HYBRID_RULE);
        let events = write_file(
            &dir,
            "events.json",
            r#"[
                {"approver_id": "c", "outcome": "approve"},
                {"approver_id": "b", "outcome": "reject"}
            ]"#,
        );

        let result = simulate::run(&rule, &events, SimulateOptions::default());
        assert_eq!(result.exit_code, 8);

        let lines: Vec<&str> = result.output.lines().collect();
        assert_eq!(lines.len(), 2, "completed step is still reported");
        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["error_class"], "decision");
        assert!(payload["message"].as_str().unwrap_or_default().contains("event 2 refused"));
    });
}

#[test]
fn simulate_rejects_unknown_outcome() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let rule = write_file(&dir, "rule.toml", HYBRID_RULE);
        let events =
            write_file(&dir, "events.json", r#"[{"approver_id": "a", "outcome": "maybe"}]"#);

        let result = simulate::run(&rule, &events, SimulateOptions::default());
        assert_eq!(result.exit_code, 6);
        assert_eq!(parse_payload(&result.output)["error_class"], "input");
    });
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "EXPENSELY_DATABASE_URL",
        "EXPENSELY_DATABASE_MAX_CONNECTIONS",
        "EXPENSELY_DATABASE_TIMEOUT_SECS",
        "EXPENSELY_APPROVALS_REQUIRED_APPROVER_POLICY",
        "EXPENSELY_APPROVALS_MAX_COMMIT_ATTEMPTS",
        "EXPENSELY_LOGGING_LEVEL",
        "EXPENSELY_LOGGING_FORMAT",
        "EXPENSELY_LOG_LEVEL",
        "EXPENSELY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
