use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::{initialize_decisions, ApprovalEngine, Evaluation};
use crate::domain::decision::{ApproverDecision, DecisionEvent};
use crate::domain::rule::{RuleDefinition, UserId};
use crate::errors::{DomainError, RuleError};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::str::FromStr for ExpenseStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(Self::Draft),
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(DomainError::InvariantViolation(format!("unknown expense status `{other}`"))),
        }
    }
}

/// Approval state of a single submitted expense.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseApproval {
    pub expense_id: ExpenseId,
    pub submitter_id: UserId,
    pub rule: RuleDefinition,
    pub decisions: Vec<ApproverDecision>,
    pub status: ExpenseStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl ExpenseApproval {
    pub fn submit(
        expense_id: ExpenseId,
        submitter_id: UserId,
        rule: RuleDefinition,
        submitter_manager_id: Option<&UserId>,
        now: DateTime<Utc>,
    ) -> Result<Self, RuleError> {
        let decisions = initialize_decisions(&rule, submitter_manager_id)?;
        Ok(Self {
            expense_id,
            submitter_id,
            rule,
            decisions,
            status: ExpenseStatus::Pending,
            started_at: now,
            completed_at: None,
            version: 0,
        })
    }

    /// Applies one decision. On error the aggregate is left exactly as it was.
    pub fn apply(
        &mut self,
        engine: &ApprovalEngine,
        event: &DecisionEvent,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, DomainError> {
        let evaluation = engine.evaluate(&self.rule, self.status, &self.decisions, event, now)?;
        self.record(&evaluation);
        Ok(evaluation)
    }

    /// Adopts an evaluation computed against this aggregate's current state.
    pub fn record(&mut self, evaluation: &Evaluation) {
        self.decisions = evaluation.decisions.clone();
        self.status = evaluation.status;
        self.completed_at = evaluation.completed_at;
        self.version += 1;
    }

    pub fn active_approvers(&self) -> Vec<&UserId> {
        if self.status != ExpenseStatus::Pending {
            return Vec::new();
        }
        self.decisions.iter().filter(|slot| slot.can_act()).map(|slot| &slot.approver_id).collect()
    }

    pub fn pending_for(&self, approver_id: &UserId) -> bool {
        self.status == ExpenseStatus::Pending
            && self.decisions.iter().any(|slot| &slot.approver_id == approver_id && slot.can_act())
    }
}
