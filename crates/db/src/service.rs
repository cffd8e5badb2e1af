use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use expensely_core::approvals::{ApprovalEngine, Evaluation};
use expensely_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
use expensely_core::config::ApprovalsConfig;
use expensely_core::domain::decision::DecisionEvent;
use expensely_core::domain::expense::{ExpenseApproval, ExpenseId};
use expensely_core::domain::rule::UserId;
use expensely_core::errors::{ApplicationError, DomainError};

use crate::repositories::{ExpenseApprovalRepository, RepositoryError, RuleRepository};

/// Outcome of a committed decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionReceipt {
    pub approval: ExpenseApproval,
    pub evaluation: Evaluation,
    pub attempts: u32,
}

/// Loads an expense, evaluates one decision and commits it with a version
/// check, re-evaluating against fresh state when another writer got there
/// first.
pub struct DecisionService {
    rules: Arc<dyn RuleRepository>,
    expenses: Arc<dyn ExpenseApprovalRepository>,
    engine: ApprovalEngine,
    max_commit_attempts: u32,
    audit: Arc<dyn AuditSink>,
}

impl DecisionService {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        expenses: Arc<dyn ExpenseApprovalRepository>,
        engine: ApprovalEngine,
        max_commit_attempts: u32,
    ) -> Self {
        Self {
            rules,
            expenses,
            engine,
            max_commit_attempts: max_commit_attempts.max(1),
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn from_config(
        rules: Arc<dyn RuleRepository>,
        expenses: Arc<dyn ExpenseApprovalRepository>,
        config: &ApprovalsConfig,
    ) -> Self {
        Self::new(
            rules,
            expenses,
            ApprovalEngine::new(config.evaluator_options()),
            config.max_commit_attempts,
        )
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub async fn submit_expense(
        &self,
        expense_id: ExpenseId,
        submitter_id: UserId,
        submitter_manager_id: Option<&UserId>,
        correlation_id: &str,
    ) -> Result<ExpenseApproval, ApplicationError> {
        let rule = self.rules.find_active_for_user(&submitter_id).await?.ok_or_else(|| {
            ApplicationError::NotFound {
                resource: format!("active approval rule for `{submitter_id}`"),
            }
        })?;

        let approval = ExpenseApproval::submit(
            expense_id,
            submitter_id,
            rule,
            submitter_manager_id,
            Utc::now(),
        )
        .map_err(DomainError::from)?;

        self.expenses.insert(approval.clone()).await?;

        let active = approval
            .active_approvers()
            .into_iter()
            .map(UserId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let audit = AuditContext::new(
            Some(approval.expense_id.clone()),
            correlation_id,
            approval.submitter_id.as_str(),
        );
        self.audit.emit(
            AuditEvent::new(
                &audit,
                "approval.expense_submitted",
                AuditCategory::Decision,
                AuditOutcome::Success,
            )
            .with_metadata("rule_id", approval.rule.id.0.clone())
            .with_metadata("active", active.clone()),
        );
        info!(
            event_name = "approval.expense.submitted",
            correlation_id,
            expense_id = %approval.expense_id.0,
            rule_id = %approval.rule.id.0,
            active = %active,
            "expense submitted for approval"
        );

        Ok(approval)
    }

    pub async fn submit_decision(
        &self,
        expense_id: &ExpenseId,
        event: &DecisionEvent,
        correlation_id: &str,
    ) -> Result<DecisionReceipt, ApplicationError> {
        let audit = AuditContext::new(
            Some(expense_id.clone()),
            correlation_id,
            event.approver_id.as_str(),
        );

        for attempt in 1..=self.max_commit_attempts {
            let mut approval =
                self.expenses.find_by_id(expense_id).await?.ok_or_else(|| {
                    ApplicationError::NotFound { resource: format!("expense `{}`", expense_id.0) }
                })?;
            let expected_version = approval.version;

            // Audit events are held back until this attempt either commits or
            // fails for a logical reason.
            let buffer = InMemoryAuditSink::default();
            let evaluation = match self.engine.evaluate_with_audit(
                &approval.rule,
                approval.status,
                &approval.decisions,
                event,
                Utc::now(),
                &buffer,
                &audit,
            ) {
                Ok(evaluation) => evaluation,
                Err(error) => {
                    self.flush(buffer);
                    warn!(
                        event_name = "approval.decision.refused",
                        correlation_id,
                        expense_id = %expense_id.0,
                        approver_id = %event.approver_id,
                        error = %error,
                        "decision refused"
                    );
                    return Err(DomainError::from(error).into());
                }
            };

            approval.record(&evaluation);
            match self.expenses.save_if_version(approval.clone(), expected_version).await {
                Ok(()) => {
                    self.flush(buffer);
                    info!(
                        event_name = "approval.decision.committed",
                        correlation_id,
                        expense_id = %expense_id.0,
                        approver_id = %event.approver_id,
                        status = approval.status.as_str(),
                        version = approval.version,
                        attempt,
                        "decision committed"
                    );
                    return Ok(DecisionReceipt { approval, evaluation, attempts: attempt });
                }
                Err(RepositoryError::VersionConflict { .. }) => {
                    warn!(
                        event_name = "approval.commit.conflict",
                        correlation_id,
                        expense_id = %expense_id.0,
                        expected_version,
                        attempt,
                        "expense changed concurrently, re-evaluating"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }

        self.audit.emit(
            AuditEvent::new(
                &audit,
                "approval.commit_exhausted",
                AuditCategory::Persistence,
                AuditOutcome::Failed,
            )
            .with_metadata("attempts", self.max_commit_attempts.to_string()),
        );
        Err(ApplicationError::Conflict {
            resource: format!("expense `{}`", expense_id.0),
            attempts: self.max_commit_attempts,
        })
    }

    /// Pending expenses on which `approver_id` may act right now.
    pub async fn inbox(&self, approver_id: &UserId) -> Result<Vec<ExpenseApproval>, ApplicationError> {
        let pending = self.expenses.list_pending().await?;
        Ok(pending.into_iter().filter(|approval| approval.pending_for(approver_id)).collect())
    }

    fn flush(&self, buffer: InMemoryAuditSink) {
        for event in buffer.events() {
            self.audit.emit(event);
        }
    }
}
