use chrono::NaiveDateTime;

use crate::model::*;
use crate::recurrence::StoredRule;

use super::{Branch, EditRequest, EngineError, Plan};

/// The rule changed for future or all occurrences. Walk the stored
/// occurrences in date order alongside the freshly generated dates:
///
/// - passed occurrences, and edited ones when `ignore_edited` is set, keep
///   their date and do not consume one from the sequence;
/// - occurrences past a count terminator are deleted;
/// - the rest take the next date (or are deleted when an until date ran out).
///
/// Dates left over afterwards become new occurrences. The edited occurrence
/// itself is never deleted: if the new rule leaves no date for it the edit is
/// rejected.
pub(super) fn plan(
    request: &EditRequest,
    rule: StoredRule,
    edited: Performance,
    siblings: &[Performance],
    now: NaiveDateTime,
) -> Result<Plan, EngineError> {
    let mut plan = Plan::new(Branch::Regenerate);
    let dates = rule.rule.dates(edited.date_start)?;
    let limit = rule.rule.occurrence_count().map(|n| n as usize);
    let rule_id = rule.id;
    plan.operations.push(StoreOperation::UpdateRule(rule));

    let mut dates = dates.into_iter();
    let mut processed = 0usize;

    for sibling in siblings {
        let is_anchor = sibling.id == edited.id;
        // The anchor is always in scope: the sequence starts from it.
        if request.scope == EditScope::Future && !is_anchor && sibling.has_passed(now) {
            continue;
        }
        processed += 1;

        if !is_anchor
            && (sibling.has_passed(now) || (request.ignore_edited && sibling.is_repeater_edited))
        {
            continue;
        }

        let past_count = limit.is_some_and(|n| processed > n);
        if is_anchor && (past_count || dates.as_slice().is_empty()) {
            return Err(EngineError::InvalidPerformance("anchor outside rule"));
        }
        if past_count {
            plan.operations.push(StoreOperation::Delete(sibling.clone()));
            continue;
        }
        let Some(date) = dates.next() else {
            plan.operations.push(StoreOperation::Delete(sibling.clone()));
            continue;
        };

        let (mut target, offset) = if is_anchor {
            let mut anchor = edited.clone();
            anchor.repeater = Some(rule_id);
            anchor.is_repeater_edited = sibling.is_repeater_edited;
            let offset = anchor.stop_offset();
            (anchor, offset)
        } else {
            let mut target = sibling.clone();
            target.broadcast_from(&edited);
            (target, sibling.stop_offset())
        };
        target.shift_to(date, offset)?;
        if target != *sibling {
            plan.operations.push(StoreOperation::Update(target));
        }
    }

    let remaining = match limit {
        Some(n) => n.saturating_sub(processed),
        None => usize::MAX,
    };
    let offset = edited.stop_offset();
    for date in dates.take(remaining) {
        let mut performance = edited.fresh_copy();
        performance.repeater = Some(rule_id);
        performance.shift_to(date, offset)?;
        plan.operations.push(StoreOperation::Create(performance));
    }
    Ok(plan)
}
