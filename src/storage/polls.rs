//! Poll repository

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, ToSql, params};

use super::StoreHandle;
use crate::model::{Answer, Poll, PollWithAnswers, new_id};
use crate::{AnswerCountError, Error, MAX_ANSWERS, MIN_ANSWERS, Result};

/// Default page size for listing queries
pub const DEFAULT_PAGE_SIZE: usize = 10;

const POLL_COLUMNS: &str = "id, author_id, question, created_at";

/// Offset-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// The page following this one
    pub fn next(&self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset + self.limit,
        }
    }
}

/// Creates polls with bounded answer sets and reads them back
pub struct PollRepository<'a> {
    store: &'a StoreHandle,
}

impl<'a> PollRepository<'a> {
    pub fn new(store: &'a StoreHandle) -> Self {
        Self { store }
    }

    /// Create a poll and its answers as one atomic unit.
    ///
    /// Answers are returned, and later read back, in the order supplied.
    pub fn create<S: AsRef<str>>(&self, author_id: &str, question: &str, answer_texts: &[S]) -> Result<PollWithAnswers> {
        if author_id.trim().is_empty() {
            return Err(Error::Authentication("a poll needs an author".into()));
        }
        if question.trim().is_empty() {
            return Err(Error::Validation("Question is required".into()));
        }
        validate_answer_count(answer_texts.len())?;
        if answer_texts.iter().any(|text| text.as_ref().trim().is_empty()) {
            return Err(Error::Validation("All answers must be non-empty strings".into()));
        }

        let poll = Poll {
            id: new_id(),
            author_id: author_id.to_string(),
            question: question.to_string(),
            created_at: Utc::now(),
        };
        let answers: Vec<Answer> = answer_texts
            .iter()
            .enumerate()
            .map(|(position, text)| Answer {
                id: new_id(),
                poll_id: poll.id.clone(),
                position: position as u32,
                text: text.as_ref().to_string(),
            })
            .collect();

        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO polls (id, author_id, question, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![poll.id, poll.author_id, poll.question, poll.created_at],
            )?;
            {
                let mut stmt =
                    tx.prepare("INSERT INTO answers (id, poll_id, position, text) VALUES (?1, ?2, ?3, ?4)")?;
                for answer in &answers {
                    stmt.execute(params![answer.id, answer.poll_id, answer.position, answer.text])?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        tracing::debug!("Created poll {} with {} answers", poll.id, answers.len());
        Ok(PollWithAnswers { poll, answers })
    }

    /// Get a poll by ID
    pub fn get_by_id(&self, id: &str) -> Result<Poll> {
        self.try_get_by_id(id)?
            .ok_or_else(|| Error::PollNotFound(id.to_string()))
    }

    /// Get a poll by ID, treating absence as a normal outcome
    pub fn try_get_by_id(&self, id: &str) -> Result<Option<Poll>> {
        self.store.with_conn(|conn| fetch_poll(conn, id))
    }

    /// Get a poll together with its ordered answers
    pub fn get_with_answers(&self, id: &str) -> Result<PollWithAnswers> {
        self.store.with_conn(|conn| {
            let poll = fetch_poll(conn, id)?.ok_or_else(|| Error::PollNotFound(id.to_string()))?;
            let answers = fetch_answers(conn, id)?;
            Ok(PollWithAnswers { poll, answers })
        })
    }

    /// Answers of a poll in the order they were supplied
    pub fn get_answers(&self, poll_id: &str) -> Result<Vec<Answer>> {
        self.store.with_conn(|conn| fetch_answers(conn, poll_id))
    }

    /// Polls by one author, newest first
    pub fn get_by_author(&self, author_id: &str, page: Page) -> Result<Vec<Poll>> {
        self.list("WHERE author_id = ?1", &[&author_id], page)
    }

    /// All polls, newest first
    pub fn get_all(&self, page: Page) -> Result<Vec<Poll>> {
        self.list("", &[], page)
    }

    /// Polls whose question contains `text`, newest first
    pub fn search(&self, text: &str, page: Page) -> Result<Vec<Poll>> {
        let pattern = format!("%{}%", escape_like(text));
        self.list("WHERE question LIKE ?1 ESCAPE '\\'", &[&pattern], page)
    }

    /// One author's polls whose question contains `text`, newest first
    pub fn search_by_author(&self, author_id: &str, text: &str, page: Page) -> Result<Vec<Poll>> {
        let pattern = format!("%{}%", escape_like(text));
        self.list(
            "WHERE author_id = ?1 AND question LIKE ?2 ESCAPE '\\'",
            &[&author_id, &pattern],
            page,
        )
    }

    /// `filter` binds `?1..?n` to `values`; paging binds the two after them
    fn list(&self, filter: &str, values: &[&dyn ToSql], page: Page) -> Result<Vec<Poll>> {
        let sql = format!(
            "SELECT {} FROM polls {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            POLL_COLUMNS,
            filter,
            values.len() + 1,
            values.len() + 2
        );
        let (limit, offset) = (page.limit as i64, page.offset as i64);
        let mut bound: Vec<&dyn ToSql> = values.to_vec();
        bound.push(&limit);
        bound.push(&offset);

        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let polls = stmt
                .query_map(bound.as_slice(), row_to_poll)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(polls)
        })
    }
}

/// Check an answer count against the allowed range
pub fn validate_answer_count(count: usize) -> Result<()> {
    if count < MIN_ANSWERS {
        return Err(Error::PollAnswerCount(AnswerCountError::TooFew(count)));
    }
    if count > MAX_ANSWERS {
        return Err(Error::PollAnswerCount(AnswerCountError::TooMany(count)));
    }
    Ok(())
}

/// Escape LIKE wildcards so user text matches literally
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub(crate) fn fetch_poll(conn: &Connection, id: &str) -> Result<Option<Poll>> {
    let sql = format!("SELECT {} FROM polls WHERE id = ?1", POLL_COLUMNS);
    let poll = conn.query_row(&sql, [id], row_to_poll).optional()?;
    Ok(poll)
}

pub(crate) fn fetch_answers(conn: &Connection, poll_id: &str) -> Result<Vec<Answer>> {
    let mut stmt = conn.prepare(
        "SELECT id, poll_id, position, text FROM answers WHERE poll_id = ?1 ORDER BY position",
    )?;
    let answers = stmt
        .query_map([poll_id], |row| {
            Ok(Answer {
                id: row.get(0)?,
                poll_id: row.get(1)?,
                position: row.get(2)?,
                text: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(answers)
}

/// Helper to convert a row to a Poll
fn row_to_poll(row: &rusqlite::Row) -> rusqlite::Result<Poll> {
    Ok(Poll {
        id: row.get(0)?,
        author_id: row.get(1)?,
        question: row.get(2)?,
        created_at: row.get(3)?,
    })
}
