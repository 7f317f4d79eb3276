use std::collections::HashMap;

use tabled::{Table, Tabled, settings::Style};

use crate::model::{Answer, Poll};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// Two-column metric/value table
#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

#[derive(Tabled)]
pub struct PollRow {
    #[tabled(rename = "Id")]
    pub id: String,
    #[tabled(rename = "Question")]
    pub question: String,
    #[tabled(rename = "Created")]
    pub created: String,
}

impl From<&Poll> for PollRow {
    fn from(poll: &Poll) -> Self {
        Self {
            id: poll.id.clone(),
            question: poll.question.clone(),
            created: poll.created_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

pub fn poll_table(polls: &[Poll]) -> String {
    if polls.is_empty() {
        return String::new();
    }
    let rows: Vec<PollRow> = polls.iter().map(PollRow::from).collect();
    Table::new(&rows).with(Style::rounded()).to_string()
}

#[derive(Debug, Tabled)]
pub struct TallyRow {
    #[tabled(rename = "#")]
    pub position: u32,
    #[tabled(rename = "Answer")]
    pub answer: String,
    #[tabled(rename = "Votes")]
    pub votes: usize,
    #[tabled(rename = "Share")]
    pub share: String,
}

/// One row per answer in position order; answers without votes count zero
pub fn tally_rows(answers: &[Answer], counts: &HashMap<String, usize>) -> Vec<TallyRow> {
    let total: usize = answers.iter().filter_map(|a| counts.get(&a.id)).sum();
    answers
        .iter()
        .map(|answer| {
            let votes = counts.get(&answer.id).copied().unwrap_or(0);
            let share = if total == 0 {
                "-".to_string()
            } else {
                format!("{:.1}%", votes as f64 * 100.0 / total as f64)
            };
            TallyRow {
                position: answer.position + 1,
                answer: answer.text.clone(),
                votes,
                share,
            }
        })
        .collect()
}

pub fn tally_table(answers: &[Answer], counts: &HashMap<String, usize>) -> String {
    let rows = tally_rows(answers, counts);
    if rows.is_empty() {
        return String::new();
    }
    Table::new(&rows).with(Style::rounded()).to_string()
}
