//! User repository

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, ToSql, params};

use super::StoreHandle;
use crate::model::{PublicUser, User, UserUpdate, new_id};
use crate::{Error, Result};

const USER_COLUMNS: &str = "id, email, name, external_ref, created_at";

/// CRUD for user identity records
pub struct UserRepository<'a> {
    store: &'a StoreHandle,
}

impl<'a> UserRepository<'a> {
    pub fn new(store: &'a StoreHandle) -> Self {
        Self { store }
    }

    /// Create a user; omitting every field yields an anonymous user
    pub fn create(&self, email: Option<&str>, name: Option<&str>, external_ref: Option<&str>) -> Result<User> {
        let id = new_id();
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, external_ref, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, email, name, external_ref, Utc::now()],
            )?;
            tracing::debug!("Created user {}", id);
            fetch_user(conn, &id)?.ok_or_else(|| user_not_found(&id))
        })
    }

    /// Create a user with no identifying fields
    pub fn create_anonymous(&self) -> Result<User> {
        self.create(None, None, None)
    }

    /// Get a user by ID
    pub fn get_by_id(&self, id: &str) -> Result<User> {
        self.store
            .with_conn(|conn| fetch_user(conn, id)?.ok_or_else(|| user_not_found(id)))
    }

    /// Find a user by email. Absence is not an error.
    pub fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_by("email", email)
    }

    /// Find a user by external identity reference. Absence is not an error.
    pub fn get_by_external_ref(&self, external_ref: &str) -> Result<Option<User>> {
        self.find_by("external_ref", external_ref)
    }

    /// Public fields of a user
    pub fn public_profile(&self, id: &str) -> Result<PublicUser> {
        self.get_by_id(id).map(|user| user.public())
    }

    /// Apply the supplied field changes and return the resulting user.
    ///
    /// Fields absent from `update` are left untouched.
    pub fn update(&self, id: &str, update: &UserUpdate) -> Result<User> {
        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<&dyn ToSql> = Vec::new();

        if let Some(email) = &update.email {
            assignments.push("email = ?");
            values.push(email);
        }
        if let Some(name) = &update.name {
            assignments.push("name = ?");
            values.push(name);
        }
        if let Some(external_ref) = &update.external_ref {
            assignments.push("external_ref = ?");
            values.push(external_ref);
        }

        if assignments.is_empty() {
            return self.get_by_id(id);
        }

        let sql = format!("UPDATE users SET {} WHERE id = ?", assignments.join(", "));
        values.push(&id);

        self.store.with_conn(|conn| {
            let changed = conn.execute(&sql, values.as_slice())?;
            if changed == 0 {
                return Err(user_not_found(id));
            }
            tracing::debug!("Updated user {} ({} field(s))", id, assignments.len());
            fetch_user(conn, id)?.ok_or_else(|| user_not_found(id))
        })
    }

    fn find_by(&self, column: &str, value: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
        self.store.with_conn(|conn| {
            let user = conn.query_row(&sql, [value], row_to_user).optional()?;
            Ok(user)
        })
    }
}

fn fetch_user(conn: &Connection, id: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    let user = conn.query_row(&sql, [id], row_to_user).optional()?;
    Ok(user)
}

fn user_not_found(id: &str) -> Error {
    Error::NotFound {
        resource: "User",
        id: id.to_string(),
    }
}

/// Helper to convert a row to a User
fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        external_ref: row.get(3)?,
        created_at: row.get(4)?,
    })
}
