mod broadcast;
mod error;
mod regenerate;

pub use error::EngineError;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;
use crate::recurrence::{RecurrenceRule, StoredRule};

/// One submission of the performance form, resolved against storage.
#[derive(Debug, Clone)]
pub struct EditRequest {
    /// Stored state before the edit. `None` when a performance is being added.
    pub original: Option<Performance>,
    /// The rule `original.repeater` points at, if any.
    pub original_rule: Option<StoredRule>,
    pub edited: Performance,
    /// `None` when repetition is switched off.
    pub edited_rule: Option<RecurrenceRule>,
    pub scope: EditScope,
    /// Leave individually edited occurrences alone during bulk edits.
    pub ignore_edited: bool,
}

/// Which reconciliation path produced a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// No repetition requested: the performance stands alone.
    Standalone,
    /// First rule for this performance: materialize every date.
    NewRule,
    /// Rule and anchor dates unchanged: copy fields across the scope.
    Broadcast,
    /// Rule changed for this occurrence only.
    Detach,
    /// Rule changed for future or all occurrences: recompute dates.
    Regenerate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub branch: Branch,
    /// Apply in order: rule writes come before the performances that reference them.
    pub operations: Vec<StoreOperation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub rules: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl Plan {
    fn new(branch: Branch) -> Self {
        Self {
            branch,
            operations: Vec::new(),
        }
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for op in &self.operations {
            match op {
                StoreOperation::CreateRule(_) | StoreOperation::UpdateRule(_) => summary.rules += 1,
                StoreOperation::Create(_) => summary.creates += 1,
                StoreOperation::Update(_) => summary.updates += 1,
                StoreOperation::Delete(_) => summary.deletes += 1,
            }
        }
        summary
    }
}

/// Compute the writes that bring stored occurrences in line with an edit.
///
/// `siblings` is the snapshot of every stored performance linked to the
/// original rule (empty when there is none). Pure: no storage access, and the
/// only clock is `now`.
pub fn reconcile(
    request: &EditRequest,
    siblings: &[Performance],
    now: NaiveDateTime,
) -> Result<Plan, EngineError> {
    let edited = request.edited.clone().normalized()?;

    if let Some(original) = &request.original {
        if original.id != edited.id {
            return Err(EngineError::InvalidPerformance("edited performance does not match original"));
        }
        if original.event_id != edited.event_id {
            return Err(EngineError::InvalidPerformance("performance cannot move to another event"));
        }
        if original.version != edited.version {
            return Err(EngineError::ConcurrencyConflict {
                id: original.id,
                expected: edited.version,
                found: original.version,
            });
        }
    }

    let Some(rule) = &request.edited_rule else {
        return Ok(standalone(request.original.as_ref(), edited));
    };
    let rule = &rule.resolved(edited.date_start);

    let (original, current) = match &request.original {
        Some(original) => match original.repeater {
            Some(rule_id) => {
                let current = request
                    .original_rule
                    .as_ref()
                    .filter(|r| r.id == rule_id)
                    .ok_or(EngineError::NotFound(rule_id))?;
                (original, current)
            }
            None => return new_rule(request.original.as_ref(), edited, rule),
        },
        None => return new_rule(None, edited, rule),
    };

    let mut siblings: Vec<Performance> = siblings
        .iter()
        .filter(|p| p.repeater == Some(current.id))
        .cloned()
        .collect();
    if !siblings.iter().any(|p| p.id == original.id) {
        siblings.push(original.clone());
    }
    siblings.sort_by(occurrence_order);

    let dates_unchanged =
        original.date_start == edited.date_start && original.date_stop == edited.date_stop;
    if dates_unchanged && current.rule.resolved(original.date_start) == *rule {
        return Ok(broadcast::plan(request, original, edited, &siblings, now));
    }

    if request.scope == EditScope::Instance {
        let mut plan = Plan::new(Branch::Detach);
        let mut anchor = edited;
        anchor.repeater = Some(current.id);
        anchor.is_repeater_edited = true;
        plan.operations.push(StoreOperation::Update(anchor));
        return Ok(plan);
    }

    let updated = StoredRule::new(current.id, rule.clone());
    regenerate::plan(request, updated, edited, &siblings, now)
}

fn standalone(original: Option<&Performance>, mut edited: Performance) -> Plan {
    let mut plan = Plan::new(Branch::Standalone);
    edited.repeater = None;
    edited.is_repeater_edited = false;
    if original.is_some() {
        plan.operations.push(StoreOperation::Update(edited));
    } else {
        edited.version = 0;
        plan.operations.push(StoreOperation::Create(edited));
    }
    plan
}

fn new_rule(
    original: Option<&Performance>,
    edited: Performance,
    rule: &RecurrenceRule,
) -> Result<Plan, EngineError> {
    let mut plan = Plan::new(Branch::NewRule);
    let rule_id = Ulid::new();
    let dates = rule.dates(edited.date_start)?;
    if dates.is_empty() {
        return Err(EngineError::InvalidRule("rule produces no dates"));
    }
    let offset = edited.stop_offset();
    plan.operations
        .push(StoreOperation::CreateRule(StoredRule::new(rule_id, rule.clone())));

    // A stored anchor keeps its record and takes the first date of the sequence.
    let mut remaining = dates.as_slice();
    if original.is_some() {
        let mut anchor = edited.clone();
        anchor.repeater = Some(rule_id);
        anchor.is_repeater_edited = false;
        anchor.shift_to(dates[0], offset)?;
        plan.operations.push(StoreOperation::Update(anchor));
        remaining = &dates[1..];
    }

    for &date in remaining {
        let mut performance = edited.fresh_copy();
        performance.repeater = Some(rule_id);
        performance.shift_to(date, offset)?;
        plan.operations.push(StoreOperation::Create(performance));
    }
    Ok(plan)
}
