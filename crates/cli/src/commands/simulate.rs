use std::path::Path;

use anyhow::{anyhow, Context};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use expensely_core::approvals::{ApprovalEngine, RequiredApproverPolicy, Resolution};
use expensely_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use expensely_core::domain::decision::{DecisionEvent, DecisionOutcome};
use expensely_core::domain::expense::{ExpenseApproval, ExpenseId};
use expensely_core::domain::rule::{RuleDefinition, UserId};
use expensely_core::errors::RuleError;

use crate::commands::{load_rule, read_document, CommandResult};

#[derive(Debug, Clone, Default)]
pub struct SimulateOptions {
    pub policy: Option<RequiredApproverPolicy>,
    pub manager_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Script {
    Steps(Vec<ScriptStep>),
    Document { events: Vec<ScriptStep> },
}

#[derive(Debug, Deserialize)]
struct ScriptStep {
    approver_id: String,
    outcome: String,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Serialize)]
struct StepReport<'a> {
    step: usize,
    approver_id: &'a str,
    outcome: DecisionOutcome,
    status: &'static str,
    activated: Vec<&'a str>,
    resolution: Option<&'a Resolution>,
    approved: usize,
    rejected: usize,
    total: usize,
    approval_percentage: String,
}

pub fn run(rule_path: &Path, events_path: &Path, options: SimulateOptions) -> CommandResult {
    let config = match AppConfig::load(LoadOptions {
        overrides: ConfigOverrides {
            required_approver_policy: options.policy,
            ..ConfigOverrides::default()
        },
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "simulate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let rule = match load_rule(rule_path) {
        Ok(rule) => rule,
        Err(error) => {
            return match error.downcast_ref::<RuleError>() {
                Some(rule_error) => {
                    CommandResult::failure("simulate", "rule_validation", rule_error.to_string(), 7)
                }
                None => CommandResult::failure("simulate", "input", format!("{error:#}"), 6),
            };
        }
    };

    let events = match load_events(events_path) {
        Ok(events) => events,
        Err(error) => return CommandResult::failure("simulate", "input", format!("{error:#}"), 6),
    };

    let engine = ApprovalEngine::new(config.approvals.evaluator_options());
    replay(&engine, rule, options.manager_id.map(UserId), &events)
}

fn load_events(path: &Path) -> anyhow::Result<Vec<DecisionEvent>> {
    let script: Script = read_document(path)?;
    let steps = match script {
        Script::Steps(steps) | Script::Document { events: steps } => steps,
    };

    steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| -> anyhow::Result<DecisionEvent> {
            let outcome = step
                .outcome
                .parse::<DecisionOutcome>()
                .map_err(|message| anyhow!(message))
                .with_context(|| format!("event {} in `{}`", index + 1, path.display()))?;
            Ok(DecisionEvent {
                approver_id: UserId(step.approver_id.trim().to_string()),
                outcome,
                comment: step.comment,
            })
        })
        .collect()
}

fn replay(
    engine: &ApprovalEngine,
    rule: RuleDefinition,
    manager_id: Option<UserId>,
    events: &[DecisionEvent],
) -> CommandResult {
    let submitter = rule.target_user_id.clone();
    let mut approval = match ExpenseApproval::submit(
        ExpenseId("SIMULATION".to_string()),
        submitter,
        rule,
        manager_id.as_ref(),
        Utc::now(),
    ) {
        Ok(approval) => approval,
        Err(error) => {
            return CommandResult::failure("simulate", "rule_validation", error.to_string(), 7);
        }
    };

    let mut lines = Vec::with_capacity(events.len());
    for (index, event) in events.iter().enumerate() {
        let evaluation = match approval.apply(engine, event, Utc::now()) {
            Ok(evaluation) => evaluation,
            Err(error) => {
                return CommandResult::failure(
                    "simulate",
                    "decision",
                    format!("event {} refused: {error}", index + 1),
                    8,
                )
                .after_lines(lines);
            }
        };

        let report = StepReport {
            step: index + 1,
            approver_id: event.approver_id.as_str(),
            outcome: event.outcome,
            status: evaluation.status.as_str(),
            activated: evaluation.activated.iter().map(UserId::as_str).collect(),
            resolution: evaluation.resolution.as_ref(),
            approved: evaluation.tally.approved,
            rejected: evaluation.tally.rejected,
            total: evaluation.tally.total,
            approval_percentage: evaluation.tally.approval_percentage().to_string(),
        };
        match serde_json::to_string(&report) {
            Ok(line) => lines.push(line),
            Err(error) => {
                return CommandResult::failure("simulate", "serialization", error.to_string(), 3)
                    .after_lines(lines);
            }
        }
    }

    tracing::info!(
        event_name = "cli.simulate.completed",
        rule_id = %approval.rule.id.0,
        steps = events.len(),
        status = approval.status.as_str(),
        "simulation completed"
    );

    let waiting = approval
        .active_approvers()
        .into_iter()
        .map(UserId::as_str)
        .collect::<Vec<_>>()
        .join(",");
    let message = if waiting.is_empty() {
        format!("final status {} after {} decision(s)", approval.status.as_str(), events.len())
    } else {
        format!(
            "final status {} after {} decision(s); waiting on {waiting}",
            approval.status.as_str(),
            events.len()
        )
    };
    CommandResult::success("simulate", message).after_lines(lines)
}
