use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::engine::{self, Branch, EditRequest, EngineError, PlanSummary};
use crate::limits::MAX_BATCH_DELETE;
use crate::model::*;
use crate::observability::{self, *};
use crate::recurrence::RuleDraft;
use crate::store::{OccurrenceStore, RuleStore};

/// A submitted performance form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceEdit {
    /// Form values. A `version` of 0 adds a new performance.
    pub performance: Performance,
    #[serde(default)]
    pub repeat: RuleDraft,
    #[serde(default)]
    pub scope: EditScope,
    #[serde(default = "default_ignore_edited")]
    pub ignore_edited: bool,
}

fn default_ignore_edited() -> bool {
    true
}

/// What an edit did to storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Applied {
    pub branch: Branch,
    pub summary: PlanSummary,
    /// Created and updated performances as stored, in apply order.
    pub saved: Vec<Performance>,
    pub deleted: Vec<Ulid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub deleted: Vec<Ulid>,
    pub missing: Vec<Ulid>,
}

/// Loads snapshots, runs the engine and applies its plan. Writes touching the
/// same rule are serialized; everything else relies on version checks.
pub struct Scheduler<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    rule_locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

/// Held for the duration of a write to one rule. Dropping it releases the
/// lock and removes the table entry once no other task holds or awaits it.
struct RuleGuard<'a> {
    locks: &'a DashMap<Ulid, Arc<Mutex<()>>>,
    rule_id: Ulid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RuleGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.rule_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl<S> Scheduler<S>
where
    S: OccurrenceStore + RuleStore,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            rule_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn lock_rule(&self, rule_id: Option<Ulid>) -> Option<RuleGuard<'_>> {
        let rule_id = rule_id?;
        let lock = self.rule_locks.entry(rule_id).or_default().clone();
        Some(RuleGuard {
            locks: &self.rule_locks,
            rule_id,
            guard: Some(lock.lock_owned().await),
        })
    }

    async fn load_original(&self, edited: &Performance) -> Result<Option<Performance>, EngineError> {
        if edited.version > 0 {
            return self.store.get(edited.id).await.map(Some);
        }
        match self.store.get(edited.id).await {
            Ok(_) => Err(EngineError::AlreadyExists(edited.id)),
            Err(EngineError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reconcile one form submission and apply the resulting plan in order.
    pub async fn submit(&self, edit: PerformanceEdit) -> Result<Applied, EngineError> {
        let started = Instant::now();
        let edited_rule = edit.repeat.to_rule()?;

        let first_look = self.load_original(&edit.performance).await?;
        let _guard = self
            .lock_rule(first_look.as_ref().and_then(|p| p.repeater))
            .await;
        // Re-read under the lock; the version check in the engine catches anything older.
        let original = match first_look {
            Some(_) => self.load_original(&edit.performance).await?,
            None => None,
        };

        let (original_rule, siblings) = match original.as_ref().and_then(|p| p.repeater) {
            Some(rule_id) => {
                let rule = self.store.get_rule(rule_id).await?;
                let siblings = self.store.query_by_rule(rule_id).await?;
                (Some(rule), siblings)
            }
            None => (None, Vec::new()),
        };

        let request = EditRequest {
            original,
            original_rule,
            edited: edit.performance,
            edited_rule,
            scope: edit.scope,
            ignore_edited: edit.ignore_edited,
        };
        let plan = match engine::reconcile(&request, &siblings, self.clock.now()) {
            Ok(plan) => plan,
            Err(e) => {
                if e.is_retryable() {
                    metrics::counter!(CONFLICTS_TOTAL).increment(1);
                    warn!("stale edit of performance {}: {e}", request.edited.id);
                }
                return Err(e);
            }
        };

        let branch = plan.branch;
        let summary = plan.summary();
        debug!(
            "plan for {}: {:?} rules={} creates={} updates={} deletes={}",
            request.edited.id, branch, summary.rules, summary.creates, summary.updates, summary.deletes
        );

        let mut applied = Applied {
            branch,
            summary,
            saved: Vec::new(),
            deleted: Vec::new(),
        };
        for op in plan.operations {
            metrics::counter!(OPERATIONS_TOTAL, "kind" => observability::operation_label(&op))
                .increment(1);
            match op {
                StoreOperation::CreateRule(rule) | StoreOperation::UpdateRule(rule) => {
                    self.store.save_rule(rule).await?;
                }
                StoreOperation::Create(p) | StoreOperation::Update(p) => {
                    applied.saved.push(self.store.save(p).await.inspect_err(|e| {
                        if e.is_retryable() {
                            metrics::counter!(CONFLICTS_TOTAL).increment(1);
                        }
                    })?);
                }
                StoreOperation::Delete(p) => {
                    self.store.delete(&p).await?;
                    applied.deleted.push(p.id);
                }
            }
        }

        let label = observability::branch_label(branch);
        metrics::counter!(RECONCILE_TOTAL, "branch" => label).increment(1);
        metrics::histogram!(RECONCILE_DURATION_SECONDS, "branch" => label)
            .record(started.elapsed().as_secs_f64());
        if let Some(anchor) = applied.saved.iter().find(|p| p.id == request.edited.id) {
            info!("saved {} ({label})", anchor.date_string());
        } else {
            info!("saved {} occurrences ({label})", applied.saved.len());
        }
        Ok(applied)
    }

    /// Performances of an event in listing order.
    pub async fn list_event(
        &self,
        event_id: Ulid,
        order: PerformanceOrder,
    ) -> Result<Vec<Performance>, EngineError> {
        let mut performances = self.store.query_by_event(event_id).await?;
        order.sort(&mut performances);
        Ok(performances)
    }

    /// Form values for editing an existing performance.
    pub async fn edit_form(&self, id: Ulid) -> Result<PerformanceEdit, EngineError> {
        let performance = self.store.get(id).await?;
        let repeat = match performance.repeater {
            Some(rule_id) => RuleDraft::from_stored(&self.store.get_rule(rule_id).await?, &performance),
            None => RuleDraft::default(),
        };
        Ok(PerformanceEdit {
            performance,
            repeat,
            scope: EditScope::default(),
            ignore_edited: default_ignore_edited(),
        })
    }

    /// Delete each id that still exists. Missing ids are reported, not fatal.
    pub async fn delete_performances(&self, ids: &[Ulid]) -> Result<DeleteReport, EngineError> {
        if ids.len() > MAX_BATCH_DELETE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut report = DeleteReport::default();
        for &id in ids {
            let performance = match self.store.get(id).await {
                Ok(p) => p,
                Err(EngineError::NotFound(_)) => {
                    report.missing.push(id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let _guard = self.lock_rule(performance.repeater).await;
            match self.store.delete(&performance).await {
                Ok(()) => {
                    debug!("deleted performance {id}");
                    report.deleted.push(id);
                }
                Err(EngineError::NotFound(_)) => report.missing.push(id),
                Err(e) => return Err(e),
            }
        }
        metrics::counter!(BULK_DELETED_TOTAL).increment(report.deleted.len() as u64);
        Ok(report)
    }
}
