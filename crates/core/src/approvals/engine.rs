use chrono::{DateTime, Utc};

use crate::approvals::activation::initialize_decisions;
use crate::approvals::evaluator::{
    evaluate_decision_with, Evaluation, EvaluatorOptions, RequiredApproverPolicy,
};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::decision::{ApproverDecision, DecisionEvent};
use crate::domain::expense::ExpenseStatus;
use crate::domain::rule::{RuleDefinition, UserId};
use crate::errors::{DecisionError, RuleError};

/// Entry point used by the application: the evaluator bound to its options.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalEngine {
    options: EvaluatorOptions,
}

impl ApprovalEngine {
    pub fn new(options: EvaluatorOptions) -> Self {
        Self { options }
    }

    pub fn with_policy(required_approver_policy: RequiredApproverPolicy) -> Self {
        Self::new(EvaluatorOptions { required_approver_policy })
    }

    pub fn options(&self) -> EvaluatorOptions {
        self.options
    }

    pub fn initialize(
        &self,
        rule: &RuleDefinition,
        submitter_manager_id: Option<&UserId>,
    ) -> Result<Vec<ApproverDecision>, RuleError> {
        initialize_decisions(rule, submitter_manager_id)
    }

    pub fn evaluate(
        &self,
        rule: &RuleDefinition,
        status: ExpenseStatus,
        decisions: &[ApproverDecision],
        event: &DecisionEvent,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, DecisionError> {
        evaluate_decision_with(self.options, rule, status, decisions, event, now)
    }

    pub fn evaluate_with_audit<S>(
        &self,
        rule: &RuleDefinition,
        status: ExpenseStatus,
        decisions: &[ApproverDecision],
        event: &DecisionEvent,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<Evaluation, DecisionError>
    where
        S: AuditSink,
    {
        let result = self.evaluate(rule, status, decisions, event, now);
        match &result {
            Ok(evaluation) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "approval.decision_applied",
                        AuditCategory::Decision,
                        AuditOutcome::Success,
                    )
                    .with_metadata("approver_id", event.approver_id.to_string())
                    .with_metadata("outcome", format!("{:?}", event.outcome))
                    .with_metadata("status", evaluation.status.as_str())
                    .with_metadata(
                        "activated",
                        evaluation
                            .activated
                            .iter()
                            .map(UserId::as_str)
                            .collect::<Vec<_>>()
                            .join(","),
                    ),
                );
                if let Some(resolution) = evaluation.resolution.as_ref().filter(|_| evaluation.is_terminal()) {
                    sink.emit(
                        AuditEvent::new(
                            audit,
                            "approval.expense_completed",
                            AuditCategory::Decision,
                            AuditOutcome::Success,
                        )
                        .with_metadata("status", evaluation.status.as_str())
                        .with_metadata("resolution", format!("{resolution:?}"))
                        .with_metadata("approval_percentage", evaluation.tally.approval_percentage().to_string()),
                    );
                }
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "approval.decision_rejected",
                        AuditCategory::Decision,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("approver_id", event.approver_id.to_string())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}
