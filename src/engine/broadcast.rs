use chrono::NaiveDateTime;

use crate::model::*;

use super::{Branch, EditRequest, Plan};

/// Rule and anchor dates are unchanged: push the edited fields onto every
/// occurrence in scope without touching dates.
pub(super) fn plan(
    request: &EditRequest,
    original: &Performance,
    edited: Performance,
    siblings: &[Performance],
    now: NaiveDateTime,
) -> Plan {
    let mut plan = Plan::new(Branch::Broadcast);

    if request.scope == EditScope::Instance {
        let mut anchor = edited;
        anchor.repeater = original.repeater;
        anchor.is_repeater_edited = true;
        plan.operations.push(StoreOperation::Update(anchor));
        return plan;
    }

    for sibling in siblings {
        let is_anchor = sibling.id == edited.id;
        if !is_anchor {
            if request.scope == EditScope::Future && sibling.has_passed(now) {
                continue;
            }
            if request.ignore_edited && sibling.is_repeater_edited {
                continue;
            }
        }

        let target = if is_anchor {
            let mut anchor = edited.clone();
            anchor.repeater = original.repeater;
            anchor.is_repeater_edited = sibling.is_repeater_edited;
            anchor
        } else {
            let mut target = sibling.clone();
            target.broadcast_from(&edited);
            target
        };
        if target != *sibling {
            plan.operations.push(StoreOperation::Update(target));
        }
    }
    plan
}
