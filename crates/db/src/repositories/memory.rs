use std::collections::HashMap;

use tokio::sync::RwLock;

use expensely_core::domain::expense::{ExpenseApproval, ExpenseId, ExpenseStatus};
use expensely_core::domain::rule::{select_rule, RuleDefinition, RuleId, UserId};

use super::{ExpenseApprovalRepository, RepositoryError, RuleRepository};

#[derive(Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<Vec<RuleDefinition>>,
}

#[async_trait::async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn find_by_id(&self, id: &RuleId) -> Result<Option<RuleDefinition>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(rules.iter().find(|rule| &rule.id == id).cloned())
    }

    async fn find_active_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<RuleDefinition>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(select_rule(&rules, user_id).cloned())
    }

    async fn save(&self, rule: RuleDefinition) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().await;
        rules.retain(|existing| existing.id != rule.id);
        rules.push(rule);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryExpenseApprovalRepository {
    approvals: RwLock<HashMap<String, ExpenseApproval>>,
}

#[async_trait::async_trait]
impl ExpenseApprovalRepository for InMemoryExpenseApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ExpenseId,
    ) -> Result<Option<ExpenseApproval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(&id.0).cloned())
    }

    async fn insert(&self, approval: ExpenseApproval) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        if approvals.contains_key(&approval.expense_id.0) {
            return Err(RepositoryError::AlreadyExists {
                entity: "expense",
                id: approval.expense_id.0,
            });
        }
        approvals.insert(approval.expense_id.0.clone(), approval);
        Ok(())
    }

    async fn save_if_version(
        &self,
        approval: ExpenseApproval,
        expected_version: i64,
    ) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        let stored_version = approvals.get(&approval.expense_id.0).map(|stored| stored.version);
        match stored_version {
            None => {
                Err(RepositoryError::NotFound { entity: "expense", id: approval.expense_id.0 })
            }
            Some(version) if version != expected_version => {
                Err(RepositoryError::VersionConflict {
                    expense_id: approval.expense_id.0,
                    expected: expected_version,
                })
            }
            Some(_) => {
                approvals.insert(approval.expense_id.0.clone(), approval);
                Ok(())
            }
        }
    }

    async fn list_pending(&self) -> Result<Vec<ExpenseApproval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        let mut pending: Vec<ExpenseApproval> = approvals
            .values()
            .filter(|approval| approval.status == ExpenseStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.started_at.cmp(&b.started_at).then_with(|| a.expense_id.0.cmp(&b.expense_id.0))
        });
        Ok(pending)
    }
}
