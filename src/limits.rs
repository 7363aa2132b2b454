/// Largest repeat interval the edit form offers ("every 1..30").
pub const MAX_STEP: u32 = 30;

/// Cap on dates a single rule may materialize in one plan.
pub const MAX_OCCURRENCES: usize = 5_000;

/// How many periods generation may walk without emitting a date before it
/// gives up (Feb 29 anchors, day 31, 5th weekdays with large steps).
pub const MAX_EMPTY_PERIODS: u32 = 2_000;

/// Cap on ids per bulk delete call.
pub const MAX_BATCH_DELETE: usize = 1_000;

/// Cap on any free-text performance field.
pub const MAX_TEXT_LEN: usize = 4_096;
