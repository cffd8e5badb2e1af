use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::approvals::activation::{activate_after, position};
use crate::domain::decision::{ApproverDecision, DecisionEvent, DecisionOutcome, DecisionStatus};
use crate::domain::expense::ExpenseStatus;
use crate::domain::rule::{RuleDefinition, UserId};
use crate::errors::{DecisionError, Ineligibility};

/// How a required approver who has not decided yet affects approval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredApproverPolicy {
    /// Required approvers can only veto; approval may complete without them.
    #[default]
    VetoOnly,
    /// Approval waits until every required approver has decided.
    HoldUntilDecided,
}

impl std::str::FromStr for RequiredApproverPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "veto_only" => Ok(Self::VetoOnly),
            "hold_until_decided" => Ok(Self::HoldUntilDecided),
            other => Err(format!(
                "unsupported required approver policy `{other}` (expected veto_only|hold_until_decided)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorOptions {
    pub required_approver_policy: RequiredApproverPolicy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    SpecificApproval { approver_id: UserId },
    RequiredVeto { approver_id: UserId },
    ThresholdMet { approval_percentage: Decimal, minimum_approval_percentage: u8 },
    /// Every slot decided, at least one rejected, and no rule fired.
    Exhausted,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl Tally {
    pub fn of(decisions: &[ApproverDecision]) -> Self {
        decisions.iter().fold(Self { total: decisions.len(), ..Self::default() }, |mut tally, slot| {
            match slot.status {
                DecisionStatus::Approved => tally.approved += 1,
                DecisionStatus::Rejected => tally.rejected += 1,
                DecisionStatus::Pending => {}
            }
            tally
        })
    }

    pub fn pending(&self) -> usize {
        self.total - self.approved - self.rejected
    }

    /// Share of approvals, rounded to two places for display.
    pub fn approval_percentage(&self) -> Decimal {
        if self.total == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.approved) * Decimal::ONE_HUNDRED / Decimal::from(self.total)).round_dp(2)
    }

    /// `approved / total * 100 >= minimum`, compared without rounding.
    pub fn meets(&self, minimum_approval_percentage: u8) -> bool {
        if self.total == 0 {
            return false;
        }
        let approved = self.approved as u128 * 100;
        let required = u128::from(minimum_approval_percentage) * self.total as u128;
        approved >= required
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub decisions: Vec<ApproverDecision>,
    pub status: ExpenseStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub activated: Vec<UserId>,
    pub resolution: Option<Resolution>,
    pub tally: Tally,
}

impl Evaluation {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

pub fn evaluate_decision(
    rule: &RuleDefinition,
    status: ExpenseStatus,
    decisions: &[ApproverDecision],
    event: &DecisionEvent,
    now: DateTime<Utc>,
) -> Result<Evaluation, DecisionError> {
    evaluate_decision_with(EvaluatorOptions::default(), rule, status, decisions, event, now)
}

/// Applies one approver decision to an expense and reports the new state.
///
/// The input slice is never modified; callers persist the returned decisions.
pub fn evaluate_decision_with(
    options: EvaluatorOptions,
    rule: &RuleDefinition,
    status: ExpenseStatus,
    decisions: &[ApproverDecision],
    event: &DecisionEvent,
    now: DateTime<Utc>,
) -> Result<Evaluation, DecisionError> {
    if status != ExpenseStatus::Pending {
        return Err(DecisionError::ExpenseAlreadyDecided { status });
    }

    let index = eligible_slot(decisions, &event.approver_id)?;

    let mut decisions = decisions.to_vec();
    let slot = &mut decisions[index];
    slot.status = event.outcome.into();
    slot.comment = event.comment.clone();
    slot.decided_at = Some(now);
    let slot = slot.clone();

    let tally = Tally::of(&decisions);
    let hold = options.required_approver_policy == RequiredApproverPolicy::HoldUntilDecided
        && decisions.iter().any(|other| other.is_required && other.is_pending());

    let mut resolution = resolve(options, rule, &decisions, &slot, event.outcome, &tally, hold);

    let mut activated = Vec::new();
    if resolution.is_none() {
        activated = activate_after(&mut decisions, index, rule.is_sequential);
        // An expense nobody rejected is never closed out as rejected.
        if tally.pending() == 0 && tally.rejected > 0 {
            resolution = Some(Resolution::Exhausted);
        }
    }

    let status = match &resolution {
        None => ExpenseStatus::Pending,
        Some(Resolution::SpecificApproval { .. } | Resolution::ThresholdMet { .. }) => {
            ExpenseStatus::Approved
        }
        Some(Resolution::RequiredVeto { .. } | Resolution::Exhausted) => ExpenseStatus::Rejected,
    };
    let completed_at = status.is_terminal().then_some(now);

    tracing::debug!(
        event_name = "approval.decision.evaluated",
        rule_id = %rule.id.0,
        approver_id = %event.approver_id,
        outcome = ?event.outcome,
        approved = tally.approved,
        rejected = tally.rejected,
        total = tally.total,
        held_for_required = hold,
        status = status.as_str(),
        "approval decision evaluated"
    );

    Ok(Evaluation { decisions, status, completed_at, activated, resolution, tally })
}

fn eligible_slot(decisions: &[ApproverDecision], approver_id: &UserId) -> Result<usize, DecisionError> {
    let ineligible = |reason| DecisionError::ApproverNotEligible { approver_id: approver_id.clone(), reason };

    let index = position(decisions, approver_id).ok_or_else(|| ineligible(Ineligibility::UnknownApprover))?;
    let slot = &decisions[index];
    if !slot.is_pending() {
        return Err(ineligible(Ineligibility::AlreadyDecided));
    }
    if !slot.is_active {
        return Err(ineligible(Ineligibility::NotActive));
    }
    Ok(index)
}

fn resolve(
    options: EvaluatorOptions,
    rule: &RuleDefinition,
    decisions: &[ApproverDecision],
    slot: &ApproverDecision,
    outcome: DecisionOutcome,
    tally: &Tally,
    hold: bool,
) -> Option<Resolution> {
    let approved = outcome == DecisionOutcome::Approved;

    if rule.rule_type.honors_specific_approvers() && slot.is_specific && approved && !hold {
        return Some(Resolution::SpecificApproval { approver_id: slot.approver_id.clone() });
    }

    if slot.is_required && !approved {
        return Some(Resolution::RequiredVeto { approver_id: slot.approver_id.clone() });
    }

    if hold {
        return None;
    }

    // A specific approval deferred by the hold policy completes once the gate clears.
    if options.required_approver_policy == RequiredApproverPolicy::HoldUntilDecided
        && rule.rule_type.honors_specific_approvers()
    {
        if let Some(specific) =
            decisions.iter().find(|other| other.is_specific && other.status == DecisionStatus::Approved)
        {
            return Some(Resolution::SpecificApproval { approver_id: specific.approver_id.clone() });
        }
    }

    if rule.rule_type.honors_percentage() && tally.meets(rule.minimum_approval_percentage) {
        return Some(Resolution::ThresholdMet {
            approval_percentage: tally.approval_percentage(),
            minimum_approval_percentage: rule.minimum_approval_percentage,
        });
    }

    None
}
