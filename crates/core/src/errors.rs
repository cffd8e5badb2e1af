use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::expense::ExpenseStatus;
use crate::domain::rule::UserId;

/// Reasons a rule definition is refused at creation time.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("invalid rule definition: at least one approver is required unless the manager approves")]
    EmptyApprovers,
    #[error("invalid rule definition: manager approval is enabled but no manager is set")]
    MissingManager,
    #[error("invalid rule definition: minimum approval percentage {value} is outside 0..=100")]
    PercentageOutOfRange { value: i64 },
    #[error("invalid rule definition: approver `{approver_id}` is listed more than once")]
    DuplicateApprover { approver_id: UserId },
    #[error("invalid rule definition: manager `{manager_id}` is also listed as an approver")]
    ManagerListedAsApprover { manager_id: UserId },
    #[error("invalid rule definition: description is required")]
    MissingDescription,
    #[error("invalid rule definition: a SPECIFIC rule needs at least one approver marked is_specific")]
    MissingSpecificApprover,
    #[error("invalid rule definition: unknown rule type `{value}` (expected PERCENTAGE|SPECIFIC|HYBRID)")]
    UnknownRuleType { value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligibility {
    UnknownApprover,
    NotActive,
    AlreadyDecided,
}

impl Ineligibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownApprover => "not an approver on this expense",
            Self::NotActive => "not yet activated",
            Self::AlreadyDecided => "already decided",
        }
    }
}

impl std::fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("approver `{approver_id}` is not eligible: {reason}")]
    ApproverNotEligible { approver_id: UserId, reason: Ineligibility },
    #[error("expense already decided with status {status:?}")]
    ExpenseAlreadyDecided { status: ExpenseStatus },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("concurrent modification of `{resource}` after {attempts} attempt(s)")]
    Conflict { resource: String, attempts: u32 },
    #[error("{resource} was not found")]
    NotFound { resource: String },
    #[error("{resource} already exists")]
    AlreadyExists { resource: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApplicationError {
    /// Logical failures are final; only persistence hiccups are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Conflict { .. })
    }
}
