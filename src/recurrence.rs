use std::collections::{BTreeSet, VecDeque};

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::Performance;

/// Which day a monthly rule repeats on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthlySelector {
    /// Same "nth weekday" as the anchor, e.g. the 2nd Tuesday.
    #[default]
    ByDayOfWeek,
    /// Same day number as the anchor, e.g. the 31st.
    ByDayOfMonth,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    Daily,
    /// Weekday numbers 1..=7, Monday = 1. Empty means the anchor's weekday.
    Weekly { days: BTreeSet<u8> },
    Monthly(MonthlySelector),
    Yearly,
}

/// When a rule stops producing dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminator {
    /// Last allowed date, inclusive.
    Until(NaiveDate),
    /// Exact number of dates.
    Count(u32),
}

/// A validated repetition pattern. Equality covers mode, step and terminator;
/// it never involves a stored identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct RecurrenceRule {
    mode: RepeatMode,
    step: u32,
    terminator: Terminator,
}

#[derive(Deserialize)]
struct RawRule {
    mode: RepeatMode,
    step: u32,
    terminator: Terminator,
}

impl TryFrom<RawRule> for RecurrenceRule {
    type Error = EngineError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        RecurrenceRule::new(raw.mode, raw.step, raw.terminator)
    }
}

impl RecurrenceRule {
    pub fn new(mode: RepeatMode, step: u32, terminator: Terminator) -> Result<Self, EngineError> {
        if step == 0 {
            return Err(EngineError::InvalidRule("step must be at least 1"));
        }
        if step > MAX_STEP {
            return Err(EngineError::LimitExceeded("step too large"));
        }
        if let RepeatMode::Weekly { days } = &mode
            && days.iter().any(|d| !(1..=7).contains(d))
        {
            return Err(EngineError::InvalidRule("weekday must be 1..=7"));
        }
        if let Terminator::Count(n) = terminator
            && n as usize > MAX_OCCURRENCES
        {
            return Err(EngineError::LimitExceeded("too many occurrences"));
        }
        Ok(Self { mode, step, terminator })
    }

    pub fn mode(&self) -> &RepeatMode {
        &self.mode
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    pub fn occurrence_count(&self) -> Option<u32> {
        match self.terminator {
            Terminator::Count(n) => Some(n),
            Terminator::Until(_) => None,
        }
    }

    /// The same rule with an empty weekly set replaced by the anchor's weekday.
    /// Both forms generate the same dates; only the resolved one compares
    /// equal to an explicit selection.
    pub fn resolved(&self, anchor: NaiveDate) -> RecurrenceRule {
        let mut rule = self.clone();
        if let RepeatMode::Weekly { days } = &mut rule.mode
            && days.is_empty()
        {
            days.insert(anchor.weekday().number_from_monday() as u8);
        }
        rule
    }

    /// Lazy, ascending dates starting from `anchor`. Every call starts over.
    pub fn generate_dates(&self, anchor: NaiveDate) -> Occurrences<'_> {
        Occurrences {
            rule: self,
            anchor,
            period: 0,
            pending: VecDeque::new(),
            emitted: 0,
            empty_periods: 0,
            done: false,
        }
    }

    /// Materialize the whole sequence, refusing sequences above [`MAX_OCCURRENCES`].
    pub fn dates(&self, anchor: NaiveDate) -> Result<Vec<NaiveDate>, EngineError> {
        let dates: Vec<NaiveDate> = self.generate_dates(anchor).take(MAX_OCCURRENCES + 1).collect();
        if dates.len() > MAX_OCCURRENCES {
            return Err(EngineError::LimitExceeded("too many occurrences"));
        }
        Ok(dates)
    }
}

/// Iterator returned by [`RecurrenceRule::generate_dates`].
pub struct Occurrences<'a> {
    rule: &'a RecurrenceRule,
    anchor: NaiveDate,
    period: u32,
    pending: VecDeque<NaiveDate>,
    emitted: u32,
    empty_periods: u32,
    done: bool,
}

impl Occurrences<'_> {
    /// Candidate dates for period `n`, plus the earliest date that period could hold.
    /// `None` once the calendar runs out of representable dates.
    fn period_dates(&self, n: u32) -> Option<(NaiveDate, Vec<NaiveDate>)> {
        let anchor = self.anchor;
        let stride = u64::from(n) * u64::from(self.rule.step);
        match &self.rule.mode {
            RepeatMode::Daily => {
                let date = anchor.checked_add_days(Days::new(stride))?;
                Some((date, vec![date]))
            }
            RepeatMode::Weekly { days } => {
                let monday = anchor.checked_sub_days(Days::new(u64::from(
                    anchor.weekday().num_days_from_monday(),
                )))?;
                let slot = monday.checked_add_days(Days::new(stride * 7))?;
                let mut dates = Vec::with_capacity(days.len().max(1));
                if days.is_empty() {
                    let offset = anchor.weekday().num_days_from_monday();
                    dates.push(slot.checked_add_days(Days::new(u64::from(offset)))?);
                } else {
                    for day in days {
                        dates.push(slot.checked_add_days(Days::new(u64::from(day - 1)))?);
                    }
                }
                dates.retain(|d| *d >= anchor);
                Some((slot, dates))
            }
            RepeatMode::Monthly(selector) => {
                let (year, month) = add_months(anchor, stride)?;
                let floor = NaiveDate::from_ymd_opt(year, month, 1)?;
                let date = match selector {
                    MonthlySelector::ByDayOfMonth => NaiveDate::from_ymd_opt(year, month, anchor.day()),
                    MonthlySelector::ByDayOfWeek => {
                        let nth = ((anchor.day() - 1) / 7 + 1) as u8;
                        NaiveDate::from_weekday_of_month_opt(year, month, anchor.weekday(), nth)
                    }
                };
                Some((floor, date.into_iter().collect()))
            }
            RepeatMode::Yearly => {
                let year = i32::try_from(i64::from(anchor.year()) + stride as i64).ok()?;
                let floor = NaiveDate::from_ymd_opt(year, 1, 1)?;
                let date = NaiveDate::from_ymd_opt(year, anchor.month(), anchor.day());
                Some((floor, date.into_iter().collect()))
            }
        }
    }
}

impl Iterator for Occurrences<'_> {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        loop {
            if self.done {
                return None;
            }
            if let Terminator::Count(n) = self.rule.terminator
                && self.emitted >= n
            {
                self.done = true;
                return None;
            }

            if let Some(date) = self.pending.pop_front() {
                if let Terminator::Until(until) = self.rule.terminator
                    && date > until
                {
                    self.done = true;
                    return None;
                }
                self.emitted += 1;
                return Some(date);
            }

            let Some((floor, dates)) = self.period_dates(self.period) else {
                self.done = true;
                return None;
            };
            if let Terminator::Until(until) = self.rule.terminator
                && floor > until
            {
                self.done = true;
                return None;
            }
            self.period += 1;

            if dates.is_empty() {
                self.empty_periods += 1;
                if self.empty_periods > MAX_EMPTY_PERIODS {
                    self.done = true;
                }
                continue;
            }
            self.empty_periods = 0;
            self.pending.extend(dates);
        }
    }
}

fn add_months(date: NaiveDate, months: u64) -> Option<(i32, u32)> {
    let total = i64::from(date.year()) * 12 + i64::from(date.month0()) + i64::try_from(months).ok()?;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    Some((year, total.rem_euclid(12) as u32 + 1))
}

/// A rule as persisted: identity plus pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRule {
    pub id: Ulid,
    pub rule: RecurrenceRule,
}

impl StoredRule {
    pub fn new(id: Ulid, rule: RecurrenceRule) -> Self {
        Self { id, rule }
    }
}

// ── Edit form ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Which terminator field the form should read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UntilKind {
    Date,
    Occurrences,
}

/// Unvalidated repeat settings as submitted alongside a performance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    #[serde(default)]
    pub is_repeat: bool,
    pub mode: Option<ModeKind>,
    #[serde(default = "default_step")]
    pub step: u32,
    #[serde(default)]
    pub weekly: Vec<u8>,
    #[serde(default)]
    pub monthly: MonthlySelector,
    pub until: Option<UntilKind>,
    pub date_until: Option<NaiveDate>,
    pub occurrences: Option<u32>,
}

fn default_step() -> u32 {
    1
}

impl Default for RuleDraft {
    fn default() -> Self {
        Self {
            is_repeat: false,
            mode: None,
            step: default_step(),
            weekly: Vec::new(),
            monthly: MonthlySelector::default(),
            until: None,
            date_until: None,
            occurrences: None,
        }
    }
}

impl RuleDraft {
    /// Validated rule, or `None` when repetition is switched off.
    pub fn to_rule(&self) -> Result<Option<RecurrenceRule>, EngineError> {
        if !self.is_repeat {
            return Ok(None);
        }
        let mode = match self.mode.ok_or(EngineError::InvalidRule("missing mode"))? {
            ModeKind::Daily => RepeatMode::Daily,
            ModeKind::Weekly => RepeatMode::Weekly {
                days: self.weekly.iter().copied().collect(),
            },
            ModeKind::Monthly => RepeatMode::Monthly(self.monthly),
            ModeKind::Yearly => RepeatMode::Yearly,
        };
        let terminator = match (self.until, self.date_until, self.occurrences) {
            (Some(UntilKind::Date), Some(date), _) => Terminator::Until(date),
            (Some(UntilKind::Date), None, _) => {
                return Err(EngineError::InvalidRule("until date required"));
            }
            (Some(UntilKind::Occurrences), _, Some(n)) => Terminator::Count(n),
            (Some(UntilKind::Occurrences), _, None) => {
                return Err(EngineError::InvalidRule("occurrence count required"));
            }
            (None, Some(date), None) => Terminator::Until(date),
            (None, None, Some(n)) => Terminator::Count(n),
            (None, Some(_), Some(_)) => {
                return Err(EngineError::InvalidRule("both until date and occurrence count set"));
            }
            (None, None, None) => {
                return Err(EngineError::InvalidRule("missing until date or occurrence count"));
            }
        };
        RecurrenceRule::new(mode, self.step, terminator).map(Some)
    }

    /// Pre-fill the form for an existing performance. The repeat box stays
    /// unticked for occurrences that were edited on their own.
    pub fn from_stored(stored: &StoredRule, performance: &Performance) -> Self {
        let rule = &stored.rule;
        let mut draft = Self {
            is_repeat: !performance.is_repeater_edited,
            step: rule.step,
            ..Self::default()
        };
        match &rule.mode {
            RepeatMode::Daily => draft.mode = Some(ModeKind::Daily),
            RepeatMode::Weekly { days } => {
                draft.mode = Some(ModeKind::Weekly);
                draft.weekly = days.iter().copied().collect();
            }
            RepeatMode::Monthly(selector) => {
                draft.mode = Some(ModeKind::Monthly);
                draft.monthly = *selector;
            }
            RepeatMode::Yearly => draft.mode = Some(ModeKind::Yearly),
        }
        match rule.terminator {
            Terminator::Until(date) => {
                draft.until = Some(UntilKind::Date);
                draft.date_until = Some(date);
            }
            Terminator::Count(n) => {
                draft.until = Some(UntilKind::Occurrences);
                draft.occurrences = Some(n);
            }
        }
        draft
    }
}
