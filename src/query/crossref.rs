//! Cross-reference orchestration
//!
//! Given a target poll and an ordered list of reference polls (each with an
//! optional answer), build one analytics record per admissible reference.
//! A reference is skipped, never reported as an error, when:
//! 1. it names the target poll itself
//! 2. the reference poll does not exist
//! 3. the reference answer is not an answer of the reference poll
//! 4. the same reference poll already appeared earlier in the list
//! 5. computing its analytics fails for any other reason

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{Answer, Poll, PublicUser};
use crate::storage::{Repositories, StoreHandle, VoteCounts};
use crate::{Error, Result};

/// One reference poll, optionally narrowed to an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReferenceRequest {
    pub poll_id: String,
    pub answer_id: Option<String>,
}

impl CrossReferenceRequest {
    pub fn new(poll_id: impl Into<String>) -> Self {
        Self {
            poll_id: poll_id.into(),
            answer_id: None,
        }
    }

    pub fn with_answer(poll_id: impl Into<String>, answer_id: impl Into<String>) -> Self {
        Self {
            poll_id: poll_id.into(),
            answer_id: Some(answer_id.into()),
        }
    }
}

/// Parses `poll` or `poll:answer`
impl FromStr for CrossReferenceRequest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (poll_id, answer_id) = match s.split_once(':') {
            Some((poll, answer)) => (poll.trim(), Some(answer.trim())),
            None => (s.trim(), None),
        };
        if poll_id.is_empty() {
            return Err(Error::Validation(format!("Invalid reference: {:?}", s)));
        }
        Ok(Self {
            poll_id: poll_id.to_string(),
            answer_id: answer_id.filter(|a| !a.is_empty()).map(str::to_string),
        })
    }
}

/// Analytics for one admitted reference poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReference {
    pub poll: Poll,
    pub answers: Vec<Answer>,
    /// The answer the reference was narrowed to, if any
    pub answer: Option<Answer>,
    pub author: PublicUser,
    /// Target-poll answer id → number of shared voters
    pub votes: VoteCounts,
}

/// Why a reference was left out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    SelfReference,
    PollNotFound,
    AnswerNotInPoll,
    Duplicate,
    Failed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::SelfReference => write!(f, "references the target poll itself"),
            SkipReason::PollNotFound => write!(f, "reference poll not found"),
            SkipReason::AnswerNotInPoll => write!(f, "answer does not belong to the reference poll"),
            SkipReason::Duplicate => write!(f, "reference poll already processed"),
            SkipReason::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

enum Outcome {
    Admit(CrossReference),
    Skip(SkipReason),
}

/// Builds cross-reference records over one store
pub struct CrossReferenceEngine<'a> {
    repos: Repositories<'a>,
}

impl<'a> CrossReferenceEngine<'a> {
    /// Create a new cross-reference engine
    pub fn new(store: &'a StoreHandle) -> Self {
        Self {
            repos: Repositories::new(store),
        }
    }

    /// One record per admissible reference, in request order
    pub fn cross_reference(&self, target_poll_id: &str, requests: &[CrossReferenceRequest]) -> Vec<CrossReference> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for request in requests {
            let outcome = self
                .evaluate(target_poll_id, request, &mut seen)
                .unwrap_or_else(|err| Outcome::Skip(SkipReason::Failed(err.to_string())));

            match outcome {
                Outcome::Admit(record) => records.push(record),
                Outcome::Skip(reason @ SkipReason::Failed(_)) => {
                    tracing::warn!("Skipping cross-reference {}: {}", request.poll_id, reason);
                }
                Outcome::Skip(reason) => {
                    tracing::debug!("Skipping cross-reference {}: {}", request.poll_id, reason);
                }
            }
        }

        records
    }

    fn evaluate(
        &self,
        target_poll_id: &str,
        request: &CrossReferenceRequest,
        seen: &mut HashSet<String>,
    ) -> Result<Outcome> {
        if request.poll_id == target_poll_id {
            return Ok(Outcome::Skip(SkipReason::SelfReference));
        }

        let Some(poll) = self.repos.polls.try_get_by_id(&request.poll_id)? else {
            return Ok(Outcome::Skip(SkipReason::PollNotFound));
        };

        let answers = self.repos.polls.get_answers(&poll.id)?;
        let answer = match &request.answer_id {
            Some(answer_id) => match answers.iter().find(|a| &a.id == answer_id) {
                Some(answer) => Some(answer.clone()),
                None => return Ok(Outcome::Skip(SkipReason::AnswerNotInPoll)),
            },
            None => None,
        };

        if !seen.insert(poll.id.clone()) {
            return Ok(Outcome::Skip(SkipReason::Duplicate));
        }

        let author = self.repos.users.public_profile(&poll.author_id)?;
        let votes = self.repos.votes.get_cross_referenced_votes(
            target_poll_id,
            &poll.id,
            answer.as_ref().map(|a| a.id.as_str()),
        )?;

        Ok(Outcome::Admit(CrossReference {
            poll,
            answers,
            answer,
            author,
            votes,
        }))
    }
}
