//! Entity types - users, polls, answers and votes
//!
//! All identifiers are opaque UUID strings assigned by the repository that
//! inserts the row; timestamps are UTC and assigned at insert time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user identity record.
///
/// Anonymous users carry no email, name or external reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Reference into an external identity provider
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Check whether this user has no identifying fields
    pub fn is_anonymous(&self) -> bool {
        self.email.is_none() && self.name.is_none() && self.external_ref.is_none()
    }

    /// The fields of this user that are safe to show to other users
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Public view of a user (no email, no external reference)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub name: Option<String>,
}

/// The set of user fields to change in an update.
///
/// `None` leaves a field untouched; `Some(None)` clears it; `Some(Some(v))`
/// sets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub email: Option<Option<String>>,
    pub name: Option<Option<String>>,
    pub external_ref: Option<Option<String>>,
}

impl UserUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(Some(email.into()));
        self
    }

    pub fn clear_email(mut self) -> Self {
        self.email = Some(None);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Some(name.into()));
        self
    }

    pub fn clear_name(mut self) -> Self {
        self.name = Some(None);
        self
    }

    pub fn external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(Some(external_ref.into()));
        self
    }

    pub fn clear_external_ref(mut self) -> Self {
        self.external_ref = Some(None);
        self
    }

    /// True when no field is being changed
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.name.is_none() && self.external_ref.is_none()
    }
}

/// A poll question owned by a single author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub author_id: String,
    pub question: String,
    pub created_at: DateTime<Utc>,
}

/// One answer option of a poll. Answers are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: String,
    pub poll_id: String,
    /// Zero-based position in the order the answers were supplied
    pub position: u32,
    pub text: String,
}

/// A poll together with its answers in input order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollWithAnswers {
    pub poll: Poll,
    pub answers: Vec<Answer>,
}

impl PollWithAnswers {
    /// Find an answer of this poll by id
    pub fn answer(&self, answer_id: &str) -> Option<&Answer> {
        self.answers.iter().find(|a| a.id == answer_id)
    }
}

/// A single user's vote on a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub poll_id: String,
    pub answer_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Generate a fresh opaque identifier
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_update_builder() {
        let update = UserUpdate::new().email("a@example.com").clear_name();
        assert_eq!(update.email, Some(Some("a@example.com".to_string())));
        assert_eq!(update.name, Some(None));
        assert_eq!(update.external_ref, None);
        assert!(!update.is_empty());
        assert!(UserUpdate::new().is_empty());
    }

    #[test]
    fn test_public_user_hides_email() {
        let user = User {
            id: "u1".into(),
            email: Some("secret@example.com".into()),
            name: Some("Ada".into()),
            external_ref: Some("g-123".into()),
            created_at: Utc::now(),
        };
        let public = user.public();
        assert_eq!(public.id, "u1");
        assert_eq!(public.name.as_deref(), Some("Ada"));
        assert!(!user.is_anonymous());
    }
}
