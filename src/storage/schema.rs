//! Database schema definitions

/// SQL to create the migrations ledger
pub const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL
)
"#;

/// SQL to create the users table
///
/// `external_ref` is added by migration `001_add_user_external_ref`.
pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT UNIQUE,
    name TEXT,
    created_at TEXT NOT NULL
)
"#;

/// SQL to create the polls table
pub const CREATE_POLLS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS polls (
    id TEXT PRIMARY KEY,
    author_id TEXT NOT NULL,
    question TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (author_id) REFERENCES users (id) ON DELETE CASCADE
)
"#;

/// SQL to create the answers table
///
/// `UNIQUE(id, poll_id)` is the parent key votes use to pin an answer to its poll.
pub const CREATE_ANSWERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS answers (
    id TEXT PRIMARY KEY,
    poll_id TEXT NOT NULL,
    position INTEGER NOT NULL CHECK (position BETWEEN 0 AND 9),
    text TEXT NOT NULL,
    FOREIGN KEY (poll_id) REFERENCES polls (id) ON DELETE CASCADE,
    UNIQUE (poll_id, position),
    UNIQUE (id, poll_id)
)
"#;

/// SQL to create the votes table
///
/// One vote per (poll, user); the answer must belong to the voted poll.
pub const CREATE_VOTES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS votes (
    id TEXT PRIMARY KEY,
    poll_id TEXT NOT NULL,
    answer_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (poll_id) REFERENCES polls (id) ON DELETE CASCADE,
    FOREIGN KEY (answer_id, poll_id) REFERENCES answers (id, poll_id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE,
    UNIQUE (poll_id, user_id)
)
"#;

/// Base tables, in dependency order
pub fn base_table_statements() -> Vec<&'static str> {
    vec![
        CREATE_USERS_TABLE,
        CREATE_POLLS_TABLE,
        CREATE_ANSWERS_TABLE,
        CREATE_VOTES_TABLE,
    ]
}

/// A named schema change, applied at most once per database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Built-in migrations. Applied in name order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_add_user_external_ref",
        sql: r#"
ALTER TABLE users ADD COLUMN external_ref TEXT;
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_external_ref
    ON users (external_ref) WHERE external_ref IS NOT NULL;
"#,
    },
    Migration {
        name: "002_add_lookup_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_polls_created ON polls (created_at);
CREATE INDEX IF NOT EXISTS idx_polls_author ON polls (author_id, created_at);
CREATE INDEX IF NOT EXISTS idx_votes_user ON votes (user_id);
CREATE INDEX IF NOT EXISTS idx_votes_answer ON votes (poll_id, answer_id);
"#,
    },
];
