use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Stale version on save/delete. Callers should re-fetch and retry.
    ConcurrencyConflict {
        id: Ulid,
        expected: u64,
        found: u64,
    },
    InvalidRule(&'static str),
    InvalidPerformance(&'static str),
    LimitExceeded(&'static str),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::ConcurrencyConflict { id, expected, found } => {
                write!(
                    f,
                    "concurrent modification of {id}: expected version {expected}, found {found}"
                )
            }
            EngineError::InvalidRule(msg) => write!(f, "invalid rule: {msg}"),
            EngineError::InvalidPerformance(msg) => write!(f, "invalid performance: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
