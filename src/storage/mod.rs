//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - users(id, email, name, external_ref, created_at)
//! - polls(id, author_id, question, created_at)
//! - answers(id, poll_id, position, text)
//! - votes(id, poll_id, answer_id, user_id, created_at)
//! - migrations(id, name, applied_at)

pub mod classify;
pub mod connection;
pub mod migrate;
pub mod polls;
pub mod schema;
pub mod users;
pub mod votes;

pub use classify::{StoreFailure, VoteContext, classify};
pub use connection::{ConnectionManager, StoreHandle, StoreMode, StoreSettings, StoreStats};
pub use migrate::{MigrationReport, SchemaMigrator};
pub use polls::{Page, PollRepository};
pub use users::UserRepository;
pub use votes::{VoteCounts, VoteRepository};

/// The three repositories over one store handle
pub struct Repositories<'a> {
    pub users: UserRepository<'a>,
    pub polls: PollRepository<'a>,
    pub votes: VoteRepository<'a>,
}

impl<'a> Repositories<'a> {
    pub fn new(store: &'a StoreHandle) -> Self {
        Self {
            users: UserRepository::new(store),
            polls: PollRepository::new(store),
            votes: VoteRepository::new(store),
        }
    }
}

/// Fresh in-memory store for unit tests. Keep the manager alive alongside it.
#[cfg(test)]
pub(crate) fn test_store() -> (ConnectionManager, StoreHandle) {
    let manager = ConnectionManager::new(StoreSettings::default());
    let store = manager.open(StoreMode::Ephemeral).expect("open ephemeral store");
    (manager, store)
}
