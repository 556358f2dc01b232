//! Error types for the bill engine and its store.

/// Rejections raised before a bill is handed to the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("amount must be a finite number")]
    NonFiniteAmount,

    #[error("day_of_month must be between 1 and 31, got {0}")]
    DayOfMonthOutOfRange(i64),

    #[error("due_date must be YYYY-MM-DD, got {0:?}")]
    InvalidDueDate(String),

    #[error("account_suffix must be exactly 4 digits, got {0:?}")]
    InvalidAccountSuffix(String),
}

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum BillError {
    /// Input failed validation; nothing was written.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// SQLite store failure.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("bill not found: {0}")]
    NotFound(String),

    /// Paid-state change does not match the bill's recurrence.
    #[error("mutation shape error: {0}")]
    MutationShape(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BillError>;
