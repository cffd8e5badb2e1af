use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::RuleError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl RuleId {
    pub fn generate() -> Self {
        Self(format!("RULE-{}", Uuid::new_v4()))
    }
}

pub const DEFAULT_MINIMUM_APPROVAL_PERCENTAGE: u8 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Percentage,
    Specific,
    Hybrid,
}

impl RuleType {
    pub fn honors_specific_approvers(self) -> bool {
        match self {
            Self::Specific | Self::Hybrid => true,
            Self::Percentage => false,
        }
    }

    pub fn honors_percentage(self) -> bool {
        match self {
            Self::Percentage | Self::Hybrid => true,
            Self::Specific => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Percentage => "PERCENTAGE",
            Self::Specific => "SPECIFIC",
            Self::Hybrid => "HYBRID",
        }
    }
}

impl std::str::FromStr for RuleType {
    type Err = RuleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PERCENTAGE" => Ok(Self::Percentage),
            "SPECIFIC" => Ok(Self::Specific),
            "HYBRID" => Ok(Self::Hybrid),
            other => Err(RuleError::UnknownRuleType { value: other.to_string() }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverSpec {
    pub approver_id: UserId,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_specific: bool,
}

impl ApproverSpec {
    pub fn new(approver_id: impl Into<String>) -> Self {
        Self { approver_id: UserId::new(approver_id), is_required: false, is_specific: false }
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn specific(mut self) -> Self {
        self.is_specific = true;
        self
    }
}

/// Approval configuration attached to an employee's expenses.
///
/// A definition is only ever produced through [`RuleDraft::build`] or after
/// [`RuleDefinition::validate`] succeeds, so the evaluator can rely on its
/// invariants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: RuleId,
    pub description: String,
    pub target_user_id: UserId,
    pub manager_id: Option<UserId>,
    pub is_manager_approver: bool,
    pub approvers: Vec<ApproverSpec>,
    pub rule_type: RuleType,
    pub is_sequential: bool,
    pub minimum_approval_percentage: u8,
    pub is_active: bool,
}

impl RuleDefinition {
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.description.trim().is_empty() {
            return Err(RuleError::MissingDescription);
        }

        if self.approvers.is_empty() && !self.is_manager_approver {
            return Err(RuleError::EmptyApprovers);
        }

        if self.is_manager_approver && self.manager_id.is_none() {
            return Err(RuleError::MissingManager);
        }

        if self.minimum_approval_percentage > 100 {
            return Err(RuleError::PercentageOutOfRange {
                value: i64::from(self.minimum_approval_percentage),
            });
        }

        // Only a specific approver can complete a SPECIFIC rule.
        if self.rule_type == RuleType::Specific
            && !self.approvers.iter().any(|approver| approver.is_specific)
        {
            return Err(RuleError::MissingSpecificApprover);
        }

        let mut seen = HashSet::with_capacity(self.approvers.len());
        for approver in &self.approvers {
            if !seen.insert(&approver.approver_id) {
                return Err(RuleError::DuplicateApprover {
                    approver_id: approver.approver_id.clone(),
                });
            }
        }

        if self.is_manager_approver {
            if let Some(manager_id) = &self.manager_id {
                if seen.contains(manager_id) {
                    return Err(RuleError::ManagerListedAsApprover {
                        manager_id: manager_id.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn approver_spec(&self, approver_id: &UserId) -> Option<&ApproverSpec> {
        self.approvers.iter().find(|spec| &spec.approver_id == approver_id)
    }

    pub fn governs(&self, user_id: &UserId) -> bool {
        &self.target_user_id == user_id
    }
}

/// Loosely-typed rule input as authored by an administrator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    pub target_user_id: String,
    #[serde(default)]
    pub manager_id: Option<String>,
    #[serde(default)]
    pub is_manager_approver: bool,
    #[serde(default)]
    pub approvers: Vec<ApproverSpec>,
    pub rule_type: String,
    #[serde(default)]
    pub is_sequential: bool,
    #[serde(default)]
    pub minimum_approval_percentage: Option<i64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl RuleDraft {
    pub fn build(self) -> Result<RuleDefinition, RuleError> {
        let rule_type = self.rule_type.parse::<RuleType>()?;

        let minimum_approval_percentage = match self.minimum_approval_percentage {
            None => DEFAULT_MINIMUM_APPROVAL_PERCENTAGE,
            Some(value) => u8::try_from(value)
                .ok()
                .filter(|pct| *pct <= 100)
                .ok_or(RuleError::PercentageOutOfRange { value })?,
        };

        let manager_id = self
            .manager_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(UserId);

        let rule = RuleDefinition {
            id: self.id.map(RuleId).unwrap_or_else(RuleId::generate),
            description: self.description.trim().to_string(),
            target_user_id: UserId(self.target_user_id.trim().to_string()),
            manager_id,
            is_manager_approver: self.is_manager_approver,
            approvers: self.approvers,
            rule_type,
            is_sequential: self.is_sequential,
            minimum_approval_percentage,
            is_active: self.is_active,
        };

        rule.validate()?;
        Ok(rule)
    }
}

/// Returns the rule that applies to new expenses submitted by `target_user_id`.
///
/// `rules` is ordered oldest first; the most recently saved active rule wins.
pub fn select_rule<'a>(
    rules: &'a [RuleDefinition],
    target_user_id: &UserId,
) -> Option<&'a RuleDefinition> {
    rules.iter().rev().find(|rule| rule.is_active && rule.governs(target_user_id))
}

#[cfg(test)]
mod tests {
    use super::{select_rule, ApproverSpec, RuleDraft, RuleType, UserId};
    use crate::errors::RuleError;

    fn draft() -> RuleDraft {
        RuleDraft {
            id: Some("RULE-1".to_string()),
            description: "Travel over budget".to_string(),
            target_user_id: "emp-1".to_string(),
            manager_id: Some("mgr-1".to_string()),
            is_manager_approver: false,
            approvers: vec![ApproverSpec::new("fin-1"), ApproverSpec::new("cfo")],
            rule_type: "percentage".to_string(),
            is_sequential: false,
            minimum_approval_percentage: Some(60),
            is_active: true,
        }
    }

    #[test]
    fn builds_valid_rule() {
        let rule = draft().build().expect("valid draft");
        assert_eq!(rule.rule_type, RuleType::Percentage);
        assert_eq!(rule.minimum_approval_percentage, 60);
        assert_eq!(rule.manager_id, Some(UserId::new("mgr-1")));
    }

    #[test]
    fn percentage_defaults_to_unanimous() {
        let mut draft = draft();
        draft.minimum_approval_percentage = None;
        assert_eq!(draft.build().expect("valid").minimum_approval_percentage, 100);
    }

    #[test]
    fn rejects_empty_approvers_without_manager_gate() {
        let mut draft = draft();
        draft.approvers.clear();
        assert_eq!(draft.build(), Err(RuleError::EmptyApprovers));
    }

    #[test]
    fn manager_gate_alone_is_a_valid_rule() {
        let mut draft = draft();
        draft.approvers.clear();
        draft.is_manager_approver = true;
        assert!(draft.build().is_ok());
    }

    #[test]
    fn specific_rule_needs_a_specific_approver() {
        let mut draft = draft();
        draft.rule_type = "SPECIFIC".to_string();
        assert_eq!(draft.clone().build(), Err(RuleError::MissingSpecificApprover));

        let mut manager_only = draft.clone();
        manager_only.approvers.clear();
        manager_only.is_manager_approver = true;
        assert_eq!(manager_only.build(), Err(RuleError::MissingSpecificApprover));

        draft.approvers[1].is_specific = true;
        assert!(draft.build().is_ok());
    }

    #[test]
    fn manager_gate_requires_manager() {
        let mut draft = draft();
        draft.is_manager_approver = true;
        draft.manager_id = Some("  ".to_string());
        assert_eq!(draft.build(), Err(RuleError::MissingManager));
    }

    #[test]
    fn rejects_percentage_out_of_range() {
        for value in [-1, 101, 300] {
            let mut draft = draft();
            draft.minimum_approval_percentage = Some(value);
            assert_eq!(draft.build(), Err(RuleError::PercentageOutOfRange { value }));
        }
    }

    #[test]
    fn rejects_duplicate_approvers() {
        let mut draft = draft();
        draft.approvers.push(ApproverSpec::new("fin-1").required());
        assert!(matches!(draft.build(), Err(RuleError::DuplicateApprover { .. })));
    }

    #[test]
    fn rejects_manager_repeated_in_approver_list() {
        let mut draft = draft();
        draft.is_manager_approver = true;
        draft.approvers.push(ApproverSpec::new("mgr-1"));
        assert!(matches!(draft.build(), Err(RuleError::ManagerListedAsApprover { .. })));
    }

    #[test]
    fn rejects_unknown_rule_type_and_blank_description() {
        let mut unknown = draft();
        unknown.rule_type = "majority".to_string();
        assert!(matches!(unknown.build(), Err(RuleError::UnknownRuleType { .. })));

        let mut blank = draft();
        blank.description = "   ".to_string();
        assert_eq!(blank.build(), Err(RuleError::MissingDescription));
    }

    #[test]
    fn draft_parses_from_toml_with_defaults() {
        let raw = r#"
            description = "Hardware purchases"
            target_user_id = "emp-9"
            rule_type = "HYBRID"

            [[approvers]]
            approver_id = "cto"
            is_specific = true

            [[approvers]]
            approver_id = "fin-1"
        "#;
        let draft: RuleDraft = toml::from_str(raw).expect("parse draft");
        let rule = draft.build().expect("valid");
        assert!(rule.is_active);
        assert!(!rule.is_sequential);
        assert!(rule.approvers[0].is_specific);
        assert!(!rule.approvers[1].is_required);
        assert!(rule.id.0.starts_with("RULE-"));
    }

    #[test]
    fn selects_latest_active_rule_for_user() {
        let mut older = draft().build().expect("valid");
        older.description = "superseded".to_string();
        let mut active = draft().build().expect("valid");
        active.description = "current".to_string();
        let mut inactive = draft().build().expect("valid");
        inactive.is_active = false;
        let other = RuleDraft { target_user_id: "emp-2".to_string(), ..draft() }
            .build()
            .expect("valid");

        let rules = vec![older, active, inactive, other];
        let selected = select_rule(&rules, &UserId::new("emp-1")).expect("a rule applies");
        assert_eq!(selected.description, "current");
        assert!(select_rule(&rules, &UserId::new("emp-404")).is_none());
    }

    #[test]
    fn rule_type_flags_are_exhaustive() {
        assert!(RuleType::Hybrid.honors_percentage());
        assert!(RuleType::Hybrid.honors_specific_approvers());
        assert!(!RuleType::Specific.honors_percentage());
        assert!(!RuleType::Percentage.honors_specific_approvers());
    }
}
