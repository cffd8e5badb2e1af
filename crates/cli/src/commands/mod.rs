pub mod config;
pub mod migrate;
pub mod rule_check;
pub mod simulate;

use std::fs;
use std::path::Path;

use anyhow::Context;
use expensely_core::domain::rule::{RuleDefinition, RuleDraft};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Prefixes the final payload with progress lines already rendered as JSON.
    pub fn after_lines(mut self, lines: Vec<String>) -> Self {
        if !lines.is_empty() {
            self.output = format!("{}\n{}", lines.join("\n"), self.output);
        }
        self
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Reads a JSON (`.json`) or TOML (anything else) document.
pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read `{}`", path.display()))?;

    let is_json = path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| {
        ext.eq_ignore_ascii_case("json")
    });
    if is_json {
        serde_json::from_str(&raw).with_context(|| format!("invalid JSON in `{}`", path.display()))
    } else {
        toml::from_str(&raw).with_context(|| format!("invalid TOML in `{}`", path.display()))
    }
}

/// Loads and validates a rule draft. Validation failures surface as
/// [`expensely_core::errors::RuleError`] inside the returned error.
pub(crate) fn load_rule(path: &Path) -> anyhow::Result<RuleDefinition> {
    let draft: RuleDraft = read_document(path)?;
    let rule = draft.build()?;
    Ok(rule)
}
