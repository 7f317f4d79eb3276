//! # EveryPoll - poll data and voting engine
//!
//! Multiple-choice polls with at most one vote per user per poll, and
//! cross-referenced analytics over the voters two polls share.
//!
//! EveryPoll provides:
//! - SQLite-backed storage with an ordered, ledger-tracked migration set
//! - A connection registry for durable, in-memory and per-process stores
//! - User, poll and vote repositories that enforce the data invariants
//! - Cross-reference analytics ("how did voters who chose X on B vote on A?")

pub mod model;
pub mod storage;
pub mod query;
pub mod config;
pub mod output;
pub mod ui;

// Re-exports for convenient access
pub use model::{Answer, Poll, PollWithAnswers, PublicUser, User, UserUpdate, Vote};
pub use storage::{
    ConnectionManager, PollRepository, Repositories, StoreHandle, StoreMode, StoreSettings,
    UserRepository, VoteRepository,
};
pub use query::{CrossReference, CrossReferenceEngine, CrossReferenceRequest, SkipReason};

/// Minimum number of answers a poll must have
pub const MIN_ANSWERS: usize = 2;

/// Maximum number of answers a poll may have
pub const MAX_ANSWERS: usize = 10;

/// Result type alias for EveryPoll operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why an answer set was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerCountError {
    TooFew(usize),
    TooMany(usize),
}

impl std::fmt::Display for AnswerCountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerCountError::TooFew(got) => write!(
                f,
                "At least {} answer options are required (got {})",
                MIN_ANSWERS, got
            ),
            AnswerCountError::TooMany(got) => write!(
                f,
                "Maximum {} answer options allowed (got {})",
                MAX_ANSWERS, got
            ),
        }
    }
}

/// Error types for EveryPoll operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    PollAnswerCount(AnswerCountError),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Poll with ID {0} not found")]
    PollNotFound(String),

    #[error("Answer {answer_id} does not belong to poll {poll_id}")]
    InvalidAnswer { poll_id: String, answer_id: String },

    #[error("User {user_id} has already voted on poll {poll_id}")]
    AlreadyVoted { user_id: String, poll_id: String },

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("Check constraint violated: {0}")]
    CheckViolation(String),

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Store handle #{0} is closed")]
    StoreClosed(u64),

    #[error("Migration {name} failed: {source}")]
    Migration {
        name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Storage error: {0}")]
    Storage(rusqlite::Error),

    #[error("Store error: {0}")]
    Store(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        storage::classify(err, None).into()
    }
}
