use chrono::{DateTime, Utc};
use sqlx::Row;

use expensely_core::domain::decision::ApproverDecision;
use expensely_core::domain::expense::{ExpenseApproval, ExpenseId, ExpenseStatus};
use expensely_core::domain::rule::{RuleDefinition, UserId};

use super::{ExpenseApprovalRepository, RepositoryError};
use crate::DbPool;

const EXPENSE_COLUMNS: &str =
    "expense_id, submitter_id, rule_json, decisions_json, status, started_at, completed_at, version";

pub struct SqlExpenseApprovalRepository {
    pool: DbPool,
}

impl SqlExpenseApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn stored_version(&self, id: &ExpenseId) -> Result<Option<i64>, RepositoryError> {
        let row = sqlx::query("SELECT version FROM expense_approvals WHERE expense_id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_get::<i64, _>("version"))
            .transpose()
            .map_err(|e| RepositoryError::Decode(e.to_string()))
    }
}

fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{field}: {e}")))
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<ExpenseApproval, RepositoryError> {
    let expense_id: String =
        row.try_get("expense_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let submitter_id: String =
        row.try_get("submitter_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let rule_json: String =
        row.try_get("rule_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decisions_json: String =
        row.try_get("decisions_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let started_at_str: String =
        row.try_get("started_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let completed_at_str: Option<String> =
        row.try_get("completed_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let version: i64 =
        row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let rule: RuleDefinition = serde_json::from_str(&rule_json)
        .map_err(|e| RepositoryError::Decode(format!("expense `{expense_id}` rule: {e}")))?;
    let decisions: Vec<ApproverDecision> = serde_json::from_str(&decisions_json)
        .map_err(|e| RepositoryError::Decode(format!("expense `{expense_id}` decisions: {e}")))?;
    let status = status_str
        .parse::<ExpenseStatus>()
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let started_at = parse_timestamp(&started_at_str, "started_at")?;
    let completed_at =
        completed_at_str.as_deref().map(|s| parse_timestamp(s, "completed_at")).transpose()?;

    Ok(ExpenseApproval {
        expense_id: ExpenseId(expense_id),
        submitter_id: UserId(submitter_id),
        rule,
        decisions,
        status,
        started_at,
        completed_at,
        version,
    })
}

struct EncodedApproval {
    rule_json: String,
    decisions_json: String,
    completed_at: Option<String>,
}

fn encode(approval: &ExpenseApproval) -> Result<EncodedApproval, RepositoryError> {
    Ok(EncodedApproval {
        rule_json: serde_json::to_string(&approval.rule)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        decisions_json: serde_json::to_string(&approval.decisions)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        completed_at: approval.completed_at.map(|dt| dt.to_rfc3339()),
    })
}

#[async_trait::async_trait]
impl ExpenseApprovalRepository for SqlExpenseApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ExpenseId,
    ) -> Result<Option<ExpenseApproval>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expense_approvals WHERE expense_id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_approval(r)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, approval: ExpenseApproval) -> Result<(), RepositoryError> {
        let encoded = encode(&approval)?;

        let result = sqlx::query(
            "INSERT INTO expense_approvals (expense_id, submitter_id, rule_id, rule_json,
                                            decisions_json, status, started_at, completed_at,
                                            version, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(expense_id) DO NOTHING",
        )
        .bind(&approval.expense_id.0)
        .bind(approval.submitter_id.as_str())
        .bind(&approval.rule.id.0)
        .bind(&encoded.rule_json)
        .bind(&encoded.decisions_json)
        .bind(approval.status.as_str())
        .bind(approval.started_at.to_rfc3339())
        .bind(&encoded.completed_at)
        .bind(approval.version)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::AlreadyExists {
                entity: "expense",
                id: approval.expense_id.0,
            });
        }

        Ok(())
    }

    async fn save_if_version(
        &self,
        approval: ExpenseApproval,
        expected_version: i64,
    ) -> Result<(), RepositoryError> {
        let encoded = encode(&approval)?;

        let result = sqlx::query(
            "UPDATE expense_approvals SET
                 decisions_json = ?,
                 status = ?,
                 completed_at = ?,
                 version = ?,
                 updated_at = ?
             WHERE expense_id = ? AND version = ?",
        )
        .bind(&encoded.decisions_json)
        .bind(approval.status.as_str())
        .bind(&encoded.completed_at)
        .bind(approval.version)
        .bind(Utc::now().to_rfc3339())
        .bind(&approval.expense_id.0)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.stored_version(&approval.expense_id).await? {
            Some(_) => Err(RepositoryError::VersionConflict {
                expense_id: approval.expense_id.0,
                expected: expected_version,
            }),
            None => Err(RepositoryError::NotFound { entity: "expense", id: approval.expense_id.0 }),
        }
    }

    async fn list_pending(&self) -> Result<Vec<ExpenseApproval>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expense_approvals
             WHERE status = 'PENDING'
             ORDER BY started_at ASC, expense_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()
    }
}
