use chrono::Utc;
use sqlx::Row;

use expensely_core::domain::rule::{ApproverSpec, RuleDefinition, RuleId, RuleType, UserId};

use super::{RepositoryError, RuleRepository};
use crate::DbPool;

const RULE_COLUMNS: &str = "id, description, target_user_id, manager_id, is_manager_approver,
        approvers_json, rule_type, is_sequential, minimum_approval_percentage, is_active";

pub struct SqlRuleRepository {
    pool: DbPool,
}

impl SqlRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<RuleDefinition, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let description: String =
        row.try_get("description").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let target_user_id: String =
        row.try_get("target_user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let manager_id: Option<String> =
        row.try_get("manager_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_manager_approver: bool =
        row.try_get("is_manager_approver").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approvers_json: String =
        row.try_get("approvers_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let rule_type: String =
        row.try_get("rule_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_sequential: bool =
        row.try_get("is_sequential").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let minimum_approval_percentage: i64 = row
        .try_get("minimum_approval_percentage")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_active: bool =
        row.try_get("is_active").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let approvers: Vec<ApproverSpec> = serde_json::from_str(&approvers_json)
        .map_err(|e| RepositoryError::Decode(format!("rule `{id}` approvers: {e}")))?;
    let rule_type = rule_type
        .parse::<RuleType>()
        .map_err(|e| RepositoryError::Decode(format!("rule `{id}`: {e}")))?;
    let minimum_approval_percentage = u8::try_from(minimum_approval_percentage).map_err(|_| {
        RepositoryError::Decode(format!(
            "rule `{id}` minimum approval percentage {minimum_approval_percentage} out of range"
        ))
    })?;

    Ok(RuleDefinition {
        id: RuleId(id),
        description,
        target_user_id: UserId(target_user_id),
        manager_id: manager_id.map(UserId),
        is_manager_approver,
        approvers,
        rule_type,
        is_sequential,
        minimum_approval_percentage,
        is_active,
    })
}

#[async_trait::async_trait]
impl RuleRepository for SqlRuleRepository {
    async fn find_by_id(&self, id: &RuleId) -> Result<Option<RuleDefinition>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_rules WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_rule(r)?)),
            None => Ok(None),
        }
    }

    async fn find_active_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<RuleDefinition>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM approval_rules
             WHERE target_user_id = ? AND is_active = 1
             ORDER BY updated_at DESC, id ASC
             LIMIT 1"
        ))
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_rule(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, rule: RuleDefinition) -> Result<(), RepositoryError> {
        let approvers_json = serde_json::to_string(&rule.approvers)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO approval_rules (id, description, target_user_id, manager_id,
                                         is_manager_approver, approvers_json, rule_type,
                                         is_sequential, minimum_approval_percentage, is_active,
                                         created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 description = excluded.description,
                 target_user_id = excluded.target_user_id,
                 manager_id = excluded.manager_id,
                 is_manager_approver = excluded.is_manager_approver,
                 approvers_json = excluded.approvers_json,
                 rule_type = excluded.rule_type,
                 is_sequential = excluded.is_sequential,
                 minimum_approval_percentage = excluded.minimum_approval_percentage,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
        )
        .bind(&rule.id.0)
        .bind(&rule.description)
        .bind(rule.target_user_id.as_str())
        .bind(rule.manager_id.as_ref().map(UserId::as_str))
        .bind(rule.is_manager_approver)
        .bind(&approvers_json)
        .bind(rule.rule_type.as_str())
        .bind(rule.is_sequential)
        .bind(i64::from(rule.minimum_approval_percentage))
        .bind(rule.is_active)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
