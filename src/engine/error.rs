use ulid::Ulid;

#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    /// Unknown id, or an id that resolves outside the caller's tenant or
    /// asserted service.
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Slot soft-disabled via `is_available = false`.
    SlotUnavailable(Ulid),
    InvalidInput(&'static str),
    /// Granting the request would oversell the slot.
    CapacityExceeded { requested: u32, available: u32 },
    LockExpired(Ulid),
    /// Lock exists but belongs to a different session.
    LockMismatch(Ulid),
    LockInsufficientCapacity { reserved: u32, requested: u32 },
    /// A capacity release would drive `booked_count` below zero. Indicates
    /// a bookkeeping bug upstream; non-retryable.
    InvalidRelease { booked: u32, releasing: u32 },
    /// Lost the slot guard to concurrent transactions. The only error
    /// class callers should retry automatically.
    TransactionConflict(Ulid),
    LimitExceeded(&'static str),
    JournalError(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransactionConflict(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotUnavailable(id) => write!(f, "slot unavailable: {id}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::CapacityExceeded { requested, available } => {
                write!(f, "capacity exceeded: requested {requested}, {available} available")
            }
            EngineError::LockExpired(id) => write!(f, "lock expired or unknown: {id}"),
            EngineError::LockMismatch(id) => {
                write!(f, "lock {id} does not match the requesting session")
            }
            EngineError::LockInsufficientCapacity { reserved, requested } => {
                write!(f, "lock reserves {reserved} but booking requests {requested}")
            }
            EngineError::InvalidRelease { booked, releasing } => {
                write!(f, "invalid release: booked {booked}, releasing {releasing}")
            }
            EngineError::TransactionConflict(id) => {
                write!(f, "transaction conflict on slot {id}, retry")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
