//! Vote repository
//!
//! One vote per (poll, user) is enforced by the store's unique index, not by
//! looking first: `create` inserts optimistically and reclassifies the
//! uniqueness failure as `Error::AlreadyVoted`. Two racing requests for the
//! same pair therefore cannot both succeed.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::StoreHandle;
use super::classify::{Classify, VoteContext};
use super::polls::fetch_poll;
use crate::model::{Vote, new_id};
use crate::{Error, Result};

const VOTE_COLUMNS: &str = "id, poll_id, answer_id, user_id, created_at";

/// Answer id → number of votes. Answers without votes are absent.
pub type VoteCounts = HashMap<String, usize>;

/// Records votes, tallies them and cross-references two polls
pub struct VoteRepository<'a> {
    store: &'a StoreHandle,
}

impl<'a> VoteRepository<'a> {
    pub fn new(store: &'a StoreHandle) -> Self {
        Self { store }
    }

    /// Record a vote.
    ///
    /// Fails with `AlreadyVoted` if the user already voted on the poll,
    /// `PollNotFound` / `InvalidAnswer` if the poll or answer do not line up.
    pub fn create(&self, user_id: &str, poll_id: &str, answer_id: &str) -> Result<Vote> {
        if user_id.trim().is_empty() {
            return Err(Error::Authentication("a vote needs a voter".into()));
        }

        let vote = Vote {
            id: new_id(),
            poll_id: poll_id.to_string(),
            answer_id: answer_id.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        };

        self.store.with_conn(|conn| {
            let inserted = conn
                .execute(
                    "INSERT INTO votes (id, poll_id, answer_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![vote.id, vote.poll_id, vote.answer_id, vote.user_id, vote.created_at],
                )
                .classify_with(VoteContext { user_id, poll_id });

            match inserted {
                Ok(_) => Ok(()),
                Err(Error::ForeignKeyViolation(message)) => {
                    Err(explain_missing_reference(conn, poll_id, answer_id, message)?)
                }
                Err(err) => Err(err),
            }
        })?;

        tracing::debug!("Recorded vote {} on poll {}", vote.id, vote.poll_id);
        Ok(vote)
    }

    /// Get a vote by ID
    pub fn get_by_id(&self, id: &str) -> Result<Vote> {
        let sql = format!("SELECT {} FROM votes WHERE id = ?1", VOTE_COLUMNS);
        self.store.with_conn(|conn| {
            conn.query_row(&sql, [id], row_to_vote)
                .optional()?
                .ok_or_else(|| Error::NotFound {
                    resource: "Vote",
                    id: id.to_string(),
                })
        })
    }

    /// Whether the user has voted on the poll.
    ///
    /// For display only; `create` never consults it.
    pub fn has_voted(&self, user_id: &str, poll_id: &str) -> Result<bool> {
        self.store.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM votes WHERE user_id = ?1 AND poll_id = ?2",
                    [user_id, poll_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// The user's vote on the poll, if any
    pub fn get_user_vote(&self, user_id: &str, poll_id: &str) -> Result<Option<Vote>> {
        let sql = format!("SELECT {} FROM votes WHERE user_id = ?1 AND poll_id = ?2", VOTE_COLUMNS);
        self.store.with_conn(|conn| {
            let vote = conn.query_row(&sql, [user_id, poll_id], row_to_vote).optional()?;
            Ok(vote)
        })
    }

    /// All votes on a poll, oldest first
    pub fn get_poll_votes(&self, poll_id: &str) -> Result<Vec<Vote>> {
        let sql = format!(
            "SELECT {} FROM votes WHERE poll_id = ?1 ORDER BY created_at, rowid",
            VOTE_COLUMNS
        );
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let votes = stmt
                .query_map([poll_id], row_to_vote)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(votes)
        })
    }

    /// Votes per answer of a poll
    pub fn count_votes_by_answer(&self, poll_id: &str) -> Result<VoteCounts> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT answer_id, COUNT(*) FROM votes WHERE poll_id = ?1 GROUP BY answer_id",
            )?;
            let counts = collect_counts(stmt.query_map([poll_id], count_row)?)?;
            Ok(counts)
        })
    }

    /// Total votes on a poll
    pub fn count_total_votes(&self, poll_id: &str) -> Result<usize> {
        self.store.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM votes WHERE poll_id = ?1",
                [poll_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// How voters on `reference_poll_id` voted on `target_poll_id`.
    ///
    /// Joins the two polls' votes on the voter; with `reference_answer_id`
    /// only voters who picked that answer on the reference poll count.
    /// Result is keyed by target-poll answer id.
    pub fn get_cross_referenced_votes(
        &self,
        target_poll_id: &str,
        reference_poll_id: &str,
        reference_answer_id: Option<&str>,
    ) -> Result<VoteCounts> {
        self.store.with_conn(|conn| {
            let base = r#"
                SELECT target.answer_id, COUNT(*)
                FROM votes AS target
                JOIN votes AS reference ON reference.user_id = target.user_id
                WHERE target.poll_id = ?1 AND reference.poll_id = ?2
            "#;

            match reference_answer_id {
                Some(answer_id) => {
                    let sql = format!("{} AND reference.answer_id = ?3 GROUP BY target.answer_id", base);
                    let mut stmt = conn.prepare(&sql)?;
                    let counts =
                        collect_counts(stmt.query_map(params![target_poll_id, reference_poll_id, answer_id], count_row)?)?;
                    Ok(counts)
                }
                None => {
                    let sql = format!("{} GROUP BY target.answer_id", base);
                    let mut stmt = conn.prepare(&sql)?;
                    let counts = collect_counts(stmt.query_map(params![target_poll_id, reference_poll_id], count_row)?)?;
                    Ok(counts)
                }
            }
        })
    }
}

/// Turn a vote foreign-key failure into the most specific error
fn explain_missing_reference(conn: &Connection, poll_id: &str, answer_id: &str, message: String) -> Result<Error> {
    if fetch_poll(conn, poll_id)?.is_none() {
        return Ok(Error::PollNotFound(poll_id.to_string()));
    }
    let belongs = conn
        .query_row(
            "SELECT 1 FROM answers WHERE id = ?1 AND poll_id = ?2",
            [answer_id, poll_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !belongs {
        return Ok(Error::InvalidAnswer {
            poll_id: poll_id.to_string(),
            answer_id: answer_id.to_string(),
        });
    }
    Ok(Error::ForeignKeyViolation(message))
}

fn count_row(row: &rusqlite::Row) -> rusqlite::Result<(String, i64)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn collect_counts(rows: impl Iterator<Item = rusqlite::Result<(String, i64)>>) -> Result<VoteCounts> {
    let mut counts = VoteCounts::new();
    for row in rows {
        let (answer_id, count) = row?;
        counts.insert(answer_id, count as usize);
    }
    Ok(counts)
}

/// Helper to convert a row to a Vote
fn row_to_vote(row: &rusqlite::Row) -> rusqlite::Result<Vote> {
    Ok(Vote {
        id: row.get(0)?,
        poll_id: row.get(1)?,
        answer_id: row.get(2)?,
        user_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PollWithAnswers, User};
    use crate::storage::{PollRepository, UserRepository, test_store};

    fn users(store: &StoreHandle, n: usize) -> Vec<User> {
        let repo = UserRepository::new(store);
        (0..n).map(|_| repo.create_anonymous().unwrap()).collect()
    }

    fn poll(store: &StoreHandle, author: &User, question: &str, answers: &[&str]) -> PollWithAnswers {
        PollRepository::new(store).create(&author.id, question, answers).unwrap()
    }

    #[test]
    fn test_record_and_count() {
        let (_manager, store) = test_store();
        let people = users(&store, 3);
        let color = poll(&store, &people[0], "Favorite color?", &["Red", "Blue", "Green"]);
        let votes = VoteRepository::new(&store);
        let (red, blue, green) = (&color.answers[0].id, &color.answers[1].id, &color.answers[2].id);

        let first = votes.create(&people[0].id, &color.poll.id, red).unwrap();
        votes.create(&people[1].id, &color.poll.id, blue).unwrap();
        votes.create(&people[2].id, &color.poll.id, red).unwrap();

        assert_eq!(first.poll_id, color.poll.id);
        assert_eq!(first.answer_id, *red);
        assert_eq!(first.user_id, people[0].id);
        assert_eq!(votes.get_by_id(&first.id).unwrap(), first);

        let counts = votes.count_votes_by_answer(&color.poll.id).unwrap();
        assert_eq!(counts.get(red), Some(&2));
        assert_eq!(counts.get(blue), Some(&1));
        assert_eq!(counts.get(green), None);
        assert_eq!(votes.count_total_votes(&color.poll.id).unwrap(), 3);
        assert_eq!(counts.values().sum::<usize>(), 3);

        let all = votes.get_poll_votes(&color.poll.id).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], first);
    }

    #[test]
    fn test_second_vote_is_already_voted() {
        let (_manager, store) = test_store();
        let voter = users(&store, 1).remove(0);
        let question = poll(&store, &voter, "Question?", &["Option 1", "Option 2"]);
        let votes = VoteRepository::new(&store);

        assert!(!votes.has_voted(&voter.id, &question.poll.id).unwrap());
        let first = votes.create(&voter.id, &question.poll.id, &question.answers[0].id).unwrap();
        assert!(votes.has_voted(&voter.id, &question.poll.id).unwrap());

        for answer in &question.answers {
            match votes.create(&voter.id, &question.poll.id, &answer.id) {
                Err(Error::AlreadyVoted { user_id, poll_id }) => {
                    assert_eq!(user_id, voter.id);
                    assert_eq!(poll_id, question.poll.id);
                }
                other => panic!("expected AlreadyVoted, got {:?}", other),
            }
        }

        assert!(votes.has_voted(&voter.id, &question.poll.id).unwrap());
        assert_eq!(votes.get_user_vote(&voter.id, &question.poll.id).unwrap(), Some(first));
        assert_eq!(votes.count_total_votes(&question.poll.id).unwrap(), 1);
    }

    #[test]
    fn test_answer_from_other_poll_is_invalid() {
        let (_manager, store) = test_store();
        let voter = users(&store, 1).remove(0);
        let a = poll(&store, &voter, "A?", &["a1", "a2"]);
        let b = poll(&store, &voter, "B?", &["b1", "b2"]);
        let votes = VoteRepository::new(&store);

        let result = votes.create(&voter.id, &a.poll.id, &b.answers[0].id);
        assert!(matches!(result, Err(Error::InvalidAnswer { .. })));

        let result = votes.create(&voter.id, "no-such-poll", &a.answers[0].id);
        assert!(matches!(result, Err(Error::PollNotFound(_))));

        let result = votes.create("no-such-user", &a.poll.id, &a.answers[0].id);
        assert!(matches!(result, Err(Error::ForeignKeyViolation(_))));

        assert!(matches!(votes.create("", &a.poll.id, &a.answers[0].id), Err(Error::Authentication(_))));
        assert_eq!(store.stats().unwrap().votes, 0);
    }

    #[test]
    fn test_get_user_vote_absent() {
        let (_manager, store) = test_store();
        let voter = users(&store, 1).remove(0);
        let question = poll(&store, &voter, "Q?", &["x", "y"]);
        let votes = VoteRepository::new(&store);

        assert_eq!(votes.get_user_vote(&voter.id, &question.poll.id).unwrap(), None);
        assert!(votes.count_votes_by_answer(&question.poll.id).unwrap().is_empty());
        assert!(matches!(votes.get_by_id("missing"), Err(Error::NotFound { resource: "Vote", .. })));
    }

    #[test]
    fn test_cross_referenced_votes() {
        let (_manager, store) = test_store();
        let people = users(&store, 10);
        let color = poll(&store, &people[0], "Favorite color?", &["Red", "Blue"]);
        let food = poll(&store, &people[0], "Favorite food?", &["Pizza", "Pasta", "Salad"]);
        let votes = VoteRepository::new(&store);

        let (red, blue) = (&color.answers[0].id, &color.answers[1].id);
        let (pizza, pasta, salad) = (&food.answers[0].id, &food.answers[1].id, &food.answers[2].id);

        for (i, person) in people.iter().enumerate() {
            let (food_choice, color_choice) = match i {
                0..=2 => (pizza, red),
                3..=5 => (pasta, red),
                _ => (salad, blue),
            };
            votes.create(&person.id, &food.poll.id, food_choice).unwrap();
            votes.create(&person.id, &color.poll.id, color_choice).unwrap();
        }

        let pizza_voters = votes.get_cross_referenced_votes(&color.poll.id, &food.poll.id, Some(pizza)).unwrap();
        assert_eq!(pizza_voters, VoteCounts::from([(red.clone(), 3)]));

        let salad_voters = votes.get_cross_referenced_votes(&color.poll.id, &food.poll.id, Some(salad)).unwrap();
        assert_eq!(salad_voters, VoteCounts::from([(blue.clone(), 4)]));

        let everyone = votes.get_cross_referenced_votes(&color.poll.id, &food.poll.id, None).unwrap();
        assert_eq!(everyone, VoteCounts::from([(red.clone(), 6), (blue.clone(), 4)]));
    }

    #[test]
    fn test_cross_reference_counts_only_shared_voters() {
        let (_manager, store) = test_store();
        let people = users(&store, 4);
        let a = poll(&store, &people[0], "A?", &["a1", "a2"]);
        let b = poll(&store, &people[0], "B?", &["b1", "b2"]);
        let votes = VoteRepository::new(&store);

        // Only people[0] and people[1] vote on both polls
        votes.create(&people[0].id, &a.poll.id, &a.answers[0].id).unwrap();
        votes.create(&people[1].id, &a.poll.id, &a.answers[1].id).unwrap();
        votes.create(&people[2].id, &a.poll.id, &a.answers[1].id).unwrap();
        votes.create(&people[0].id, &b.poll.id, &b.answers[0].id).unwrap();
        votes.create(&people[1].id, &b.poll.id, &b.answers[0].id).unwrap();
        votes.create(&people[3].id, &b.poll.id, &b.answers[1].id).unwrap();

        let shared = votes.get_cross_referenced_votes(&a.poll.id, &b.poll.id, None).unwrap();
        assert_eq!(shared, VoteCounts::from([(a.answers[0].id.clone(), 1), (a.answers[1].id.clone(), 1)]));

        let b2 = votes.get_cross_referenced_votes(&a.poll.id, &b.poll.id, Some(&b.answers[1].id)).unwrap();
        assert!(b2.is_empty());
    }

    #[test]
    fn test_concurrent_votes_on_one_pair_admit_exactly_one() {
        use crate::storage::{ConnectionManager, StoreMode, StoreSettings};
        use std::sync::{Arc, Barrier};

        const WRITERS: usize = 4;

        let dir = tempfile::tempdir().unwrap();
        let manager = ConnectionManager::new(StoreSettings::new(dir.path()));
        let setup = manager.open(StoreMode::IsolatedDurable).unwrap();
        let people = users(&setup, 10);
        let questions: Vec<PollWithAnswers> = (0..3)
            .map(|i| poll(&setup, &people[0], &format!("Question {}?", i), &["yes", "no"]))
            .collect();

        let pairs: Vec<(String, String, String)> = people
            .iter()
            .flat_map(|person| {
                questions
                    .iter()
                    .map(|q| (person.id.clone(), q.poll.id.clone(), q.answers[0].id.clone()))
            })
            .collect();

        // Separate handles, so separate connections to the same file
        let handles: Vec<StoreHandle> = (0..WRITERS)
            .map(|_| manager.open(StoreMode::IsolatedDurable).unwrap())
            .collect();
        let barrier = Arc::new(Barrier::new(WRITERS));

        let outcomes: Vec<Vec<Result<Vote>>> = std::thread::scope(|scope| {
            let workers: Vec<_> = handles
                .iter()
                .map(|handle| {
                    let barrier = Arc::clone(&barrier);
                    let pairs = &pairs;
                    scope.spawn(move || {
                        let votes = VoteRepository::new(handle);
                        barrier.wait();
                        pairs
                            .iter()
                            .map(|(user, poll, answer)| votes.create(user, poll, answer))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        for (i, (user, poll, _)) in pairs.iter().enumerate() {
            let mut admitted = 0;
            for results in &outcomes {
                match &results[i] {
                    Ok(vote) => {
                        assert_eq!(&vote.user_id, user);
                        admitted += 1;
                    }
                    Err(Error::AlreadyVoted { user_id, poll_id }) => {
                        assert_eq!(user_id, user);
                        assert_eq!(poll_id, poll);
                    }
                    Err(other) => panic!("unexpected error for pair {}: {:?}", i, other),
                }
            }
            assert_eq!(admitted, 1, "pair {} admitted {} votes", i, admitted);
        }

        assert_eq!(setup.stats().unwrap().votes, pairs.len());
        manager.purge_isolated().unwrap();
    }
}
