use std::path::Path;

use expensely_core::domain::rule::RuleDefinition;
use expensely_core::errors::RuleError;

use crate::commands::{load_rule, CommandResult};

pub fn run(path: &Path) -> CommandResult {
    match load_rule(path) {
        Ok(rule) => {
            tracing::info!(
                event_name = "cli.rule_check.valid",
                rule_id = %rule.id.0,
                path = %path.display(),
                "rule definition is valid"
            );
            CommandResult::success("rule-check", describe(&rule))
        }
        Err(error) => match error.downcast_ref::<RuleError>() {
            Some(rule_error) => {
                CommandResult::failure("rule-check", "rule_validation", rule_error.to_string(), 7)
            }
            None => CommandResult::failure("rule-check", "input", format!("{error:#}"), 6),
        },
    }
}

fn describe(rule: &RuleDefinition) -> String {
    let activation = if rule.is_sequential { "sequential" } else { "parallel" };
    let manager = match (&rule.is_manager_approver, &rule.manager_id) {
        (true, Some(manager_id)) => format!(", manager `{manager_id}` decides first"),
        _ => String::new(),
    };
    let required = rule.approvers.iter().filter(|spec| spec.is_required).count();
    let specific = rule.approvers.iter().filter(|spec| spec.is_specific).count();

    format!(
        "rule `{}` is valid: {} for `{}`, {} approver(s) ({required} required, {specific} specific), {activation}, minimum {}%{manager}",
        rule.id.0,
        rule.rule_type.as_str(),
        rule.target_user_id,
        rule.approvers.len(),
        rule.minimum_approval_percentage,
    )
}
