use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Write-ahead log append, flush, or compaction failed.
    WalError(String),
    /// A write targeted a row the transaction does not hold a lock on.
    NotLocked(Ulid),
    /// Inserted row id already exists.
    DuplicateKey(Ulid),
    /// Locks requested out of the user, booking, seat order.
    LockOrder(&'static str),
    /// Reference data rejected by a hard limit.
    LimitExceeded(&'static str),
    /// Backend cannot serve the request right now.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
            StoreError::NotLocked(id) => write!(f, "row {id} is not locked by this transaction"),
            StoreError::DuplicateKey(id) => write!(f, "duplicate key: {id}"),
            StoreError::LockOrder(msg) => write!(f, "lock order violated: {msg}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
