use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_TEXT_LEN;
use crate::recurrence::StoredRule;

/// One concrete dated occurrence of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Performance {
    pub id: Ulid,
    /// Optimistic concurrency token. `0` means the performance was never stored.
    #[serde(default)]
    pub version: u64,
    pub event_id: Ulid,
    pub date_start: NaiveDate,
    pub time_start: Option<NaiveTime>,
    /// Only meaningful when `is_period` is set.
    pub date_stop: Option<NaiveDate>,
    pub time_stop: Option<NaiveTime>,
    #[serde(default)]
    pub is_day: bool,
    #[serde(default)]
    pub is_period: bool,
    /// Rule this performance was generated from, if any.
    pub repeater: Option<Ulid>,
    /// Set once this occurrence was changed on its own; bulk rule edits may skip it.
    #[serde(default)]
    pub is_repeater_edited: bool,
    pub location: Option<String>,
    pub description: Option<String>,
    pub ticket_url: Option<String>,
    #[serde(default)]
    pub is_sold_out: bool,
}

/// Non-date fields copied from an edited performance onto its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PerformanceField {
    TimeStart,
    TimeStop,
    IsDay,
    Location,
    Description,
    TicketUrl,
    IsSoldOut,
}

pub const BROADCAST_FIELDS: [PerformanceField; 7] = [
    PerformanceField::TimeStart,
    PerformanceField::TimeStop,
    PerformanceField::IsDay,
    PerformanceField::Location,
    PerformanceField::Description,
    PerformanceField::TicketUrl,
    PerformanceField::IsSoldOut,
];

impl Performance {
    pub fn new(id: Ulid, event_id: Ulid, date_start: NaiveDate) -> Self {
        Self {
            id,
            version: 0,
            event_id,
            date_start,
            time_start: None,
            date_stop: None,
            time_stop: None,
            is_day: false,
            is_period: false,
            repeater: None,
            is_repeater_edited: false,
            location: None,
            description: None,
            ticket_url: None,
            is_sold_out: false,
        }
    }

    pub fn is_stored(&self) -> bool {
        self.version > 0
    }

    /// Start instant. All-day performances start at midnight.
    pub fn starts_at(&self) -> NaiveDateTime {
        let time = if self.is_day {
            NaiveTime::default()
        } else {
            self.time_start.unwrap_or_default()
        };
        self.date_start.and_time(time)
    }

    pub fn has_passed(&self, now: NaiveDateTime) -> bool {
        self.starts_at() < now
    }

    /// Days between start and stop date, when the performance spans a period.
    pub fn stop_offset(&self) -> Option<TimeDelta> {
        self.date_stop.map(|stop| stop.signed_duration_since(self.date_start))
    }

    /// Move to `date`, keeping `offset` between start and stop.
    pub fn shift_to(&mut self, date: NaiveDate, offset: Option<TimeDelta>) -> Result<(), EngineError> {
        self.date_start = date;
        self.date_stop = match offset {
            Some(offset) => Some(
                date.checked_add_signed(offset)
                    .ok_or(EngineError::LimitExceeded("date out of range"))?,
            ),
            None => None,
        };
        Ok(())
    }

    /// Copy of this performance as a brand-new, never stored record.
    pub fn fresh_copy(&self) -> Self {
        Self {
            id: Ulid::new(),
            version: 0,
            is_repeater_edited: false,
            ..self.clone()
        }
    }

    pub fn copy_field(&mut self, source: &Performance, field: PerformanceField) {
        match field {
            PerformanceField::TimeStart => self.time_start = source.time_start,
            PerformanceField::TimeStop => self.time_stop = source.time_stop,
            PerformanceField::IsDay => self.is_day = source.is_day,
            PerformanceField::Location => self.location = source.location.clone(),
            PerformanceField::Description => self.description = source.description.clone(),
            PerformanceField::TicketUrl => self.ticket_url = source.ticket_url.clone(),
            PerformanceField::IsSoldOut => self.is_sold_out = source.is_sold_out,
        }
    }

    pub fn broadcast_from(&mut self, source: &Performance) {
        for field in BROADCAST_FIELDS {
            self.copy_field(source, field);
        }
    }

    /// Drop a stale stop date on single-date performances and check the rest.
    pub fn normalized(mut self) -> Result<Self, EngineError> {
        if self.is_period {
            match self.date_stop {
                None => return Err(EngineError::InvalidPerformance("period without stop date")),
                Some(stop) if stop < self.date_start => {
                    return Err(EngineError::InvalidPerformance("stop date before start date"));
                }
                Some(_) => {}
            }
        } else {
            self.date_stop = None;
        }
        for text in [&self.location, &self.description, &self.ticket_url]
            .into_iter()
            .flatten()
        {
            if text.len() > MAX_TEXT_LEN {
                return Err(EngineError::LimitExceeded("text field too long"));
            }
        }
        Ok(self)
    }

    /// Human summary, e.g. `2024-01-01 20:00 - 22:00`.
    pub fn date_string(&self) -> String {
        let mut out = self.date_start.format("%Y-%m-%d").to_string();
        if !self.is_day
            && let Some(start) = self.time_start
        {
            out.push_str(&format!(" {}", start.format("%H:%M")));
        }
        if self.is_period
            && let Some(stop) = self.date_stop
        {
            out.push_str(&format!(" - {}", stop.format("%Y-%m-%d")));
            if !self.is_day
                && let Some(time_stop) = self.time_stop
            {
                out.push_str(&format!(" {}", time_stop.format("%H:%M")));
            }
        } else if !self.is_day
            && let Some(time_stop) = self.time_stop
        {
            out.push_str(&format!(" - {}", time_stop.format("%H:%M")));
        }
        out
    }
}

/// Storage order: `(date_start, time_start)` ascending.
pub fn occurrence_order(a: &Performance, b: &Performance) -> Ordering {
    a.date_start
        .cmp(&b.date_start)
        .then(a.time_start.cmp(&b.time_start))
}

/// How far an edit reaches across the occurrences of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditScope {
    /// Only the edited occurrence.
    #[default]
    Instance,
    /// The edited occurrence and everything that has not started yet.
    Future,
    /// Every occurrence of the rule.
    All,
}

/// Sort orders offered on an event's performance listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceOrder {
    #[default]
    StartAsc,
    StartDesc,
    StopAsc,
    StopDesc,
}

impl PerformanceOrder {
    pub fn sort(self, performances: &mut [Performance]) {
        match self {
            PerformanceOrder::StartAsc => performances.sort_by(occurrence_order),
            PerformanceOrder::StartDesc => performances.sort_by(|a, b| occurrence_order(b, a)),
            PerformanceOrder::StopAsc => performances.sort_by(stop_order),
            PerformanceOrder::StopDesc => performances.sort_by(|a, b| stop_order(b, a)),
        }
    }
}

fn stop_order(a: &Performance, b: &Performance) -> Ordering {
    a.date_stop
        .unwrap_or(a.date_start)
        .cmp(&b.date_stop.unwrap_or(b.date_start))
        .then(a.time_stop.cmp(&b.time_stop))
}

/// A single write the engine wants applied, in emitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOperation {
    CreateRule(StoredRule),
    UpdateRule(StoredRule),
    Create(Performance),
    Update(Performance),
    Delete(Performance),
}

impl StoreOperation {
    /// The performance this operation writes, if any.
    pub fn performance(&self) -> Option<&Performance> {
        match self {
            StoreOperation::Create(p) | StoreOperation::Update(p) | StoreOperation::Delete(p) => Some(p),
            StoreOperation::CreateRule(_) | StoreOperation::UpdateRule(_) => None,
        }
    }
}
