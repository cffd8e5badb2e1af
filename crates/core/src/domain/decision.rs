use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::rule::{ApproverSpec, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
}

impl DecisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

/// The verdict an approver submits. Unlike [`DecisionStatus`] it can never be pending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Approved,
    Rejected,
}

impl From<DecisionOutcome> for DecisionStatus {
    fn from(value: DecisionOutcome) -> Self {
        match value {
            DecisionOutcome::Approved => Self::Approved,
            DecisionOutcome::Rejected => Self::Rejected,
        }
    }
}

impl std::str::FromStr for DecisionOutcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Ok(Self::Approved),
            "rejected" | "reject" => Ok(Self::Rejected),
            other => Err(format!("unsupported decision outcome `{other}` (expected approve|reject)")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub approver_id: UserId,
    pub outcome: DecisionOutcome,
    #[serde(default)]
    pub comment: Option<String>,
}

impl DecisionEvent {
    pub fn approve(approver_id: impl Into<String>) -> Self {
        Self { approver_id: UserId::new(approver_id), outcome: DecisionOutcome::Approved, comment: None }
    }

    pub fn reject(approver_id: impl Into<String>) -> Self {
        Self { approver_id: UserId::new(approver_id), outcome: DecisionOutcome::Rejected, comment: None }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Runtime state of one approver slot on a submitted expense.
///
/// The approver flags are copied from the rule when the expense is submitted
/// so later edits to the rule leave in-flight expenses untouched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverDecision {
    pub approver_id: UserId,
    pub status: DecisionStatus,
    pub comment: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_specific: bool,
    #[serde(default)]
    pub is_manager: bool,
}

impl ApproverDecision {
    pub fn for_manager(manager_id: UserId) -> Self {
        Self {
            approver_id: manager_id,
            status: DecisionStatus::Pending,
            comment: None,
            decided_at: None,
            is_active: false,
            is_required: false,
            is_specific: false,
            is_manager: true,
        }
    }

    pub fn for_approver(spec: &ApproverSpec) -> Self {
        Self {
            approver_id: spec.approver_id.clone(),
            status: DecisionStatus::Pending,
            comment: None,
            decided_at: None,
            is_active: false,
            is_required: spec.is_required,
            is_specific: spec.is_specific,
            is_manager: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == DecisionStatus::Pending
    }

    pub fn can_act(&self) -> bool {
        self.is_pending() && self.is_active
    }
}
