pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{
    evaluate_decision, initialize_decisions, ApprovalEngine, Evaluation, EvaluatorOptions,
    RequiredApproverPolicy, Resolution, Tally,
};
pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::decision::{ApproverDecision, DecisionEvent, DecisionOutcome, DecisionStatus};
pub use domain::expense::{ExpenseApproval, ExpenseId, ExpenseStatus};
pub use domain::rule::{
    select_rule, ApproverSpec, RuleDefinition, RuleDraft, RuleId, RuleType, UserId,
};
pub use errors::{ApplicationError, DecisionError, DomainError, Ineligibility, RuleError};
