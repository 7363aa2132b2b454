pub mod clock;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod recurrence;
pub mod scheduler;
pub mod store;
