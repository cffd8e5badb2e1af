use crate::domain::decision::ApproverDecision;
use crate::domain::rule::{RuleDefinition, UserId};
use crate::errors::RuleError;

/// Builds the decision slots for a freshly submitted expense.
///
/// The manager (when the rule gates on them) always owns slot zero and is the
/// only one active; otherwise a sequential rule activates its first approver
/// and a parallel rule activates everyone.
pub fn initialize_decisions(
    rule: &RuleDefinition,
    submitter_manager_id: Option<&UserId>,
) -> Result<Vec<ApproverDecision>, RuleError> {
    rule.validate()?;

    let mut decisions = Vec::with_capacity(rule.approvers.len() + 1);

    if rule.is_manager_approver {
        let manager_id = submitter_manager_id
            .or(rule.manager_id.as_ref())
            .cloned()
            .ok_or(RuleError::MissingManager)?;
        if rule.approver_spec(&manager_id).is_some() {
            return Err(RuleError::ManagerListedAsApprover { manager_id });
        }
        decisions.push(ApproverDecision::for_manager(manager_id));
    }

    decisions.extend(rule.approvers.iter().map(ApproverDecision::for_approver));

    if rule.is_manager_approver || rule.is_sequential {
        if let Some(first) = decisions.first_mut() {
            first.is_active = true;
        }
    } else {
        for slot in &mut decisions {
            slot.is_active = true;
        }
    }

    Ok(decisions)
}

pub fn position(decisions: &[ApproverDecision], approver_id: &UserId) -> Option<usize> {
    decisions.iter().position(|slot| &slot.approver_id == approver_id)
}

/// Activates whoever may act after slot `decided` resolved without ending the
/// expense. Returns the approvers that were not already active.
pub fn activate_after(
    decisions: &mut [ApproverDecision],
    decided: usize,
    sequential: bool,
) -> Vec<UserId> {
    let mut activated = Vec::new();

    if sequential {
        if let Some(next) = decisions.get_mut(decided + 1) {
            if next.is_pending() && !next.is_active {
                next.is_active = true;
                activated.push(next.approver_id.clone());
            }
        }
        return activated;
    }

    for slot in decisions.iter_mut().filter(|slot| slot.is_pending() && !slot.is_active) {
        slot.is_active = true;
        activated.push(slot.approver_id.clone());
    }
    activated
}

#[cfg(test)]
mod tests {
    use super::{activate_after, initialize_decisions, position};
    use crate::domain::decision::DecisionStatus;
    use crate::domain::rule::{ApproverSpec, RuleDefinition, RuleId, RuleType, UserId};
    use crate::errors::RuleError;

    fn rule(is_manager_approver: bool, is_sequential: bool) -> RuleDefinition {
        RuleDefinition {
            id: RuleId("RULE-1".to_string()),
            description: "Conference travel".to_string(),
            target_user_id: UserId::new("emp-1"),
            manager_id: Some(UserId::new("mgr-1")),
            is_manager_approver,
            approvers: vec![
                ApproverSpec::new("a").required(),
                ApproverSpec::new("b").specific(),
                ApproverSpec::new("c"),
            ],
            rule_type: RuleType::Hybrid,
            is_sequential,
            minimum_approval_percentage: 50,
            is_active: true,
        }
    }

    fn active_ids(rule: &RuleDefinition, manager: Option<&UserId>) -> Vec<String> {
        initialize_decisions(rule, manager)
            .expect("valid rule")
            .into_iter()
            .filter(|slot| slot.is_active)
            .map(|slot| slot.approver_id.0)
            .collect()
    }

    #[test]
    fn parallel_rule_activates_everyone() {
        assert_eq!(active_ids(&rule(false, false), None), vec!["a", "b", "c"]);
    }

    #[test]
    fn sequential_rule_activates_first_approver_only() {
        assert_eq!(active_ids(&rule(false, true), None), vec!["a"]);
    }

    #[test]
    fn manager_gate_wins_over_sequencing() {
        assert_eq!(active_ids(&rule(true, false), None), vec!["mgr-1"]);
        assert_eq!(active_ids(&rule(true, true), None), vec!["mgr-1"]);
    }

    #[test]
    fn slots_preserve_rule_order_and_flags() {
        let decisions = initialize_decisions(&rule(true, false), None).expect("valid rule");
        let ids: Vec<&str> = decisions.iter().map(|slot| slot.approver_id.as_str()).collect();
        assert_eq!(ids, vec!["mgr-1", "a", "b", "c"]);
        assert!(decisions[0].is_manager);
        assert!(!decisions[0].is_required && !decisions[0].is_specific);
        assert!(decisions[1].is_required);
        assert!(decisions[2].is_specific);
        assert!(decisions.iter().all(|slot| slot.status == DecisionStatus::Pending));
        assert!(decisions.iter().all(|slot| slot.decided_at.is_none()));
    }

    #[test]
    fn submitter_manager_overrides_rule_manager() {
        let manager = UserId::new("mgr-2");
        assert_eq!(active_ids(&rule(true, false), Some(&manager)), vec!["mgr-2"]);
    }

    #[test]
    fn submitter_manager_cannot_double_as_approver() {
        let manager = UserId::new("c");
        let error = initialize_decisions(&rule(true, false), Some(&manager))
            .expect_err("manager already owns a slot");
        assert!(matches!(error, RuleError::ManagerListedAsApprover { .. }));
    }

    #[test]
    fn invalid_rule_is_rejected_before_construction() {
        let mut invalid = rule(false, false);
        invalid.approvers.clear();
        assert_eq!(initialize_decisions(&invalid, None), Err(RuleError::EmptyApprovers));
    }

    #[test]
    fn sequential_activation_only_moves_forward() {
        let mut decisions = initialize_decisions(&rule(false, true), None).expect("valid rule");
        decisions[0].status = DecisionStatus::Rejected;

        let activated = activate_after(&mut decisions, 0, true);
        assert_eq!(activated, vec![UserId::new("b")]);
        assert!(!decisions[2].is_active);

        let last = position(&decisions, &UserId::new("c")).expect("c has a slot");
        assert!(activate_after(&mut decisions, last, true).is_empty());
    }

    #[test]
    fn parallel_activation_is_idempotent() {
        let mut decisions = initialize_decisions(&rule(true, false), None).expect("valid rule");
        decisions[0].status = DecisionStatus::Approved;

        assert_eq!(activate_after(&mut decisions, 0, false).len(), 3);
        assert!(activate_after(&mut decisions, 0, false).is_empty());
        assert_eq!(position(&decisions, &UserId::new("zz")), None);
    }
}
