use async_trait::async_trait;
use thiserror::Error;

use expensely_core::domain::expense::{ExpenseApproval, ExpenseId};
use expensely_core::domain::rule::{RuleDefinition, RuleId, UserId};
use expensely_core::errors::ApplicationError;

pub mod expense;
pub mod memory;
pub mod rule;

pub use expense::SqlExpenseApprovalRepository;
pub use memory::{InMemoryExpenseApprovalRepository, InMemoryRuleRepository};
pub use rule::SqlRuleRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("expense `{expense_id}` was modified concurrently (expected version {expected})")]
    VersionConflict { expense_id: String, expected: i64 },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} `{id}` already exists")]
    AlreadyExists { entity: &'static str, id: String },
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::VersionConflict { expense_id, .. } => {
                Self::Conflict { resource: expense_id, attempts: 1 }
            }
            RepositoryError::NotFound { entity, id } => {
                Self::NotFound { resource: format!("{entity} `{id}`") }
            }
            RepositoryError::AlreadyExists { entity, id } => {
                Self::AlreadyExists { resource: format!("{entity} `{id}`") }
            }
            other => Self::Persistence(other.to_string()),
        }
    }
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn find_by_id(&self, id: &RuleId) -> Result<Option<RuleDefinition>, RepositoryError>;

    /// Most recently updated active rule governing `user_id`.
    async fn find_active_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<RuleDefinition>, RepositoryError>;

    async fn save(&self, rule: RuleDefinition) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ExpenseApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ExpenseId)
        -> Result<Option<ExpenseApproval>, RepositoryError>;

    /// Stores a freshly submitted approval. Fails with `AlreadyExists` if the
    /// expense is already tracked.
    async fn insert(&self, approval: ExpenseApproval) -> Result<(), RepositoryError>;

    /// Replaces the stored approval only while its version still equals
    /// `expected_version`.
    async fn save_if_version(
        &self,
        approval: ExpenseApproval,
        expected_version: i64,
    ) -> Result<(), RepositoryError>;

    async fn list_pending(&self) -> Result<Vec<ExpenseApproval>, RepositoryError>;
}
