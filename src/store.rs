use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;
use crate::recurrence::StoredRule;

/// Durable home of performances. Queries return `(date_start, time_start)` order.
#[async_trait]
pub trait OccurrenceStore: Send + Sync {
    async fn get(&self, id: Ulid) -> Result<Performance, EngineError>;

    async fn query_by_rule(&self, rule_id: Ulid) -> Result<Vec<Performance>, EngineError>;

    async fn query_by_event(&self, event_id: Ulid) -> Result<Vec<Performance>, EngineError>;

    /// Insert when `version` is 0, otherwise update. Returns the stored copy
    /// with its bumped version.
    async fn save(&self, performance: Performance) -> Result<Performance, EngineError>;

    async fn delete(&self, performance: &Performance) -> Result<(), EngineError>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_rule(&self, id: Ulid) -> Result<StoredRule, EngineError>;

    async fn save_rule(&self, rule: StoredRule) -> Result<StoredRule, EngineError>;
}

pub struct InMemoryStore {
    performances: DashMap<Ulid, Performance>,
    rules: DashMap<Ulid, StoredRule>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            performances: DashMap::new(),
            rules: DashMap::new(),
        }
    }

    pub fn performance_count(&self) -> usize {
        self.performances.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn collect_sorted(&self, keep: impl Fn(&Performance) -> bool) -> Vec<Performance> {
        let mut out: Vec<Performance> = self
            .performances
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(occurrence_order);
        out
    }
}

#[async_trait]
impl OccurrenceStore for InMemoryStore {
    async fn get(&self, id: Ulid) -> Result<Performance, EngineError> {
        self.performances
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    async fn query_by_rule(&self, rule_id: Ulid) -> Result<Vec<Performance>, EngineError> {
        if !self.rules.contains_key(&rule_id) {
            return Err(EngineError::NotFound(rule_id));
        }
        Ok(self.collect_sorted(|p| p.repeater == Some(rule_id)))
    }

    async fn query_by_event(&self, event_id: Ulid) -> Result<Vec<Performance>, EngineError> {
        Ok(self.collect_sorted(|p| p.event_id == event_id))
    }

    async fn save(&self, mut performance: Performance) -> Result<Performance, EngineError> {
        if let Some(rule_id) = performance.repeater
            && !self.rules.contains_key(&rule_id)
        {
            return Err(EngineError::NotFound(rule_id));
        }
        match self.performances.entry(performance.id) {
            Entry::Occupied(mut entry) => {
                let found = entry.get().version;
                if performance.version != found {
                    return Err(EngineError::ConcurrencyConflict {
                        id: performance.id,
                        expected: performance.version,
                        found,
                    });
                }
                performance.version = found + 1;
                entry.insert(performance.clone());
            }
            Entry::Vacant(entry) => {
                // A non-zero version means the caller saw a record that is gone now.
                if performance.version != 0 {
                    return Err(EngineError::NotFound(performance.id));
                }
                performance.version = 1;
                entry.insert(performance.clone());
            }
        }
        Ok(performance)
    }

    async fn delete(&self, performance: &Performance) -> Result<(), EngineError> {
        match self.performances.entry(performance.id) {
            Entry::Occupied(entry) => {
                let found = entry.get().version;
                if performance.version != found {
                    return Err(EngineError::ConcurrencyConflict {
                        id: performance.id,
                        expected: performance.version,
                        found,
                    });
                }
                entry.remove();
                Ok(())
            }
            Entry::Vacant(_) => Err(EngineError::NotFound(performance.id)),
        }
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn get_rule(&self, id: Ulid) -> Result<StoredRule, EngineError> {
        self.rules
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    async fn save_rule(&self, rule: StoredRule) -> Result<StoredRule, EngineError> {
        self.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }
}
