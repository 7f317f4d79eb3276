//! Store failure classification
//!
//! SQLite reports every constraint failure as the same error code; the kind
//! of constraint is only visible in the message text. All message matching
//! lives here.

use std::sync::LazyLock;

use regex::Regex;

use crate::Error;

static UNIQUE_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"UNIQUE constraint failed(?::\s*(?P<columns>.+))?").expect("valid regex"));

/// Columns SQLite names when a second vote for the same (poll, user) lands
const VOTE_PAIR: [&str; 2] = ["votes.poll_id", "votes.user_id"];

/// Identifiers to attach when a vote-uniqueness failure is recognised
#[derive(Debug, Clone, Copy)]
pub struct VoteContext<'a> {
    pub user_id: &'a str,
    pub poll_id: &'a str,
}

/// Classified store failure
#[derive(Debug)]
pub enum StoreFailure {
    /// Generic uniqueness violation
    Unique { columns: Vec<String>, message: String },
    /// Uniqueness violation on the (poll, user) vote pair
    AlreadyVoted { user_id: String, poll_id: String },
    ForeignKey { message: String },
    Check { message: String },
    /// Failure with no diagnostic text at all
    Opaque,
    /// Anything not recognised, passed through unchanged
    Unknown(rusqlite::Error),
}

/// Classify a raw store failure.
///
/// `context` is only consulted for vote-pair uniqueness failures.
pub fn classify(err: rusqlite::Error, context: Option<VoteContext<'_>>) -> StoreFailure {
    let message = match &err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
        rusqlite::Error::SqliteFailure(_, None) => return StoreFailure::Opaque,
        other => other.to_string(),
    };

    if let Some(caps) = UNIQUE_FAILED.captures(&message) {
        let columns: Vec<String> = caps
            .name("columns")
            .map(|m| m.as_str().split(',').map(|c| c.trim().to_string()).collect())
            .unwrap_or_default();

        if let Some(ctx) = context {
            if is_vote_pair(&columns) {
                return StoreFailure::AlreadyVoted {
                    user_id: ctx.user_id.to_string(),
                    poll_id: ctx.poll_id.to_string(),
                };
            }
        }
        return StoreFailure::Unique { columns, message };
    }

    if message.contains("FOREIGN KEY constraint failed") {
        return StoreFailure::ForeignKey { message };
    }

    if message.contains("CHECK constraint failed") {
        return StoreFailure::Check { message };
    }

    StoreFailure::Unknown(err)
}

fn is_vote_pair(columns: &[String]) -> bool {
    columns.len() == VOTE_PAIR.len() && VOTE_PAIR.iter().all(|c| columns.iter().any(|col| col == c))
}

impl From<StoreFailure> for Error {
    fn from(failure: StoreFailure) -> Self {
        match failure {
            StoreFailure::Unique { message, .. } => Error::UniqueViolation(message),
            StoreFailure::AlreadyVoted { user_id, poll_id } => Error::AlreadyVoted { user_id, poll_id },
            StoreFailure::ForeignKey { message } => Error::ForeignKeyViolation(message),
            StoreFailure::Check { message } => Error::CheckViolation(message),
            StoreFailure::Opaque => Error::Store("Unknown database error"),
            StoreFailure::Unknown(err) => Error::Storage(err),
        }
    }
}

/// Classify the error side of a store result
pub trait Classify<T> {
    fn classify_with(self, context: VoteContext<'_>) -> crate::Result<T>;
}

impl<T> Classify<T> for rusqlite::Result<T> {
    fn classify_with(self, context: VoteContext<'_>) -> crate::Result<T> {
        self.map_err(|err| classify(err, Some(context)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn constraint_failure(message: Option<&str>) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_CONSTRAINT),
            message.map(str::to_string),
        )
    }

    const CTX: VoteContext<'static> = VoteContext { user_id: "u1", poll_id: "p1" };

    #[test]
    fn test_vote_pair_with_context_is_already_voted() {
        let err = constraint_failure(Some("UNIQUE constraint failed: votes.poll_id, votes.user_id"));
        match classify(err, Some(CTX)) {
            StoreFailure::AlreadyVoted { user_id, poll_id } => {
                assert_eq!(user_id, "u1");
                assert_eq!(poll_id, "p1");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_vote_pair_without_context_is_generic_unique() {
        let err = constraint_failure(Some("UNIQUE constraint failed: votes.poll_id, votes.user_id"));
        match classify(err, None) {
            StoreFailure::Unique { columns, .. } => {
                assert_eq!(columns, vec!["votes.poll_id", "votes.user_id"]);
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_other_unique_column_ignores_context() {
        let err = constraint_failure(Some("UNIQUE constraint failed: users.email"));
        assert!(matches!(classify(err, Some(CTX)), StoreFailure::Unique { .. }));
    }

    #[test]
    fn test_foreign_key_and_check() {
        let fk = constraint_failure(Some("FOREIGN KEY constraint failed"));
        assert!(matches!(classify(fk, None), StoreFailure::ForeignKey { .. }));

        let check = constraint_failure(Some("CHECK constraint failed: position BETWEEN 0 AND 9"));
        assert!(matches!(classify(check, None), StoreFailure::Check { .. }));
    }

    #[test]
    fn test_unrecognised_passes_through() {
        let err = rusqlite::Error::QueryReturnedNoRows;
        match classify(err, None) {
            StoreFailure::Unknown(rusqlite::Error::QueryReturnedNoRows) => {}
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_message_less_failure_is_opaque() {
        let err: Error = classify(constraint_failure(None), None).into();
        assert_eq!(err.to_string(), "Store error: Unknown database error");
    }

    #[test]
    fn test_real_store_failures_convert_through_from() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT UNIQUE, n INTEGER CHECK (n > 0))").unwrap();
        conn.execute("INSERT INTO t (k, n) VALUES ('a', 1)", []).unwrap();

        let dup: Error = conn.execute("INSERT INTO t (k, n) VALUES ('a', 2)", []).unwrap_err().into();
        assert!(matches!(dup, Error::UniqueViolation(_)));

        let bad: Error = conn.execute("INSERT INTO t (k, n) VALUES ('b', 0)", []).unwrap_err().into();
        assert!(matches!(bad, Error::CheckViolation(_)));
    }
}
