//! EveryPoll CLI - administration and analytics over a poll store

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use everypoll::config::{self, EveryPollConfig};
use everypoll::output::{OutputFormat, emit_json};
use everypoll::storage::{MigrationReport, Page};
use everypoll::ui::{self, Icons};
use everypoll::{
    ConnectionManager, CrossReferenceEngine, CrossReferenceRequest, Repositories, StoreHandle, StoreMode, StoreSettings,
};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "everypoll")]
#[command(version)]
#[command(about = "Poll store administration and cross-referenced vote analytics")]
#[command(long_about = r#"
EveryPoll keeps multiple-choice polls, their answers and one vote per user
per poll, and answers questions such as "how did the people who picked
Pizza on the food poll vote on the color poll?".

Example usage:
  everypoll init
  everypoll polls --search color
  everypoll show <poll-id>
  everypoll crossref <color-poll-id> --reference <food-poll-id>:<pizza-answer-id>
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,

        /// Directory for database files
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Open the durable store and apply pending migrations
    Migrate,

    /// Show row counts of the store
    Stats,

    /// List polls, newest first
    Polls {
        /// Only polls whose question contains this text
        #[arg(short, long)]
        search: Option<String>,

        /// Only polls by this author
        #[arg(short, long)]
        author: Option<String>,

        /// Maximum number of polls
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Number of polls to skip
        #[arg(short, long, default_value = "0")]
        offset: usize,
    },

    /// Show a poll with its answers and vote tallies
    Show {
        /// Poll id
        poll: String,
    },

    /// Cross-reference a target poll against other polls
    Crossref {
        /// Target poll id
        target: String,

        /// Reference poll, optionally narrowed to an answer: POLL[:ANSWER]
        #[arg(short, long = "reference", required = true)]
        references: Vec<CrossReferenceRequest>,
    },
}

fn resolve_settings(cli: &Cli) -> anyhow::Result<StoreSettings> {
    let mut settings = match config::load_config(cli.config.as_deref())? {
        Some(cfg) => StoreSettings::from_config(&cfg),
        None => StoreSettings::default(),
    };
    if let Some(database) = &cli.database {
        settings.database = Some(database.clone());
    }
    Ok(settings)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(err) = run(&cli) {
        ui::error(&format!("{:#}", err));
        std::process::exit(1);
    }
    Ok(())
}

/// An open durable store; closed when dropped
struct Session {
    manager: ConnectionManager,
    store: StoreHandle,
    report: MigrationReport,
}

impl Session {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let manager = ConnectionManager::new(resolve_settings(cli)?);
        let (store, report) = manager.open_with_report(StoreMode::Durable)?;
        Ok(Self { manager, store, report })
    }

    fn repos(&self) -> Repositories<'_> {
        Repositories::new(&self.store)
    }

    fn location(&self) -> String {
        self.manager.settings().durable_path().display().to_string()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.manager.close_one(&self.store);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let human = cli.format.is_human();

    match &cli.command {
        Commands::Init { force, data_dir } => {
            let path = cli.config.clone().unwrap_or_else(config::default_config_path);
            let cfg = EveryPollConfig {
                database: cli.database.as_ref().map(|p| p.display().to_string()),
                data_dir: Some(
                    data_dir
                        .clone()
                        .unwrap_or_else(|| config::default_data_dir().display().to_string()),
                ),
                busy_timeout_ms: None,
            };
            config::write_config(&path, &cfg, *force)?;
            if human {
                ui::success(&format!("Wrote config to {}", path.display()));
            } else {
                emit_json(&json!({ "config": path, "settings": cfg }))?;
            }
        }

        Commands::Migrate => {
            let session = Session::open(cli)?;
            let report = &session.report;
            if human {
                ui::status(Icons::DATABASE, "Database", &session.location());
                if report.is_noop() {
                    ui::success(&report.to_string());
                } else {
                    for name in &report.applied {
                        ui::status(Icons::WRENCH, "Applied", name);
                    }
                    ui::success(&format!(
                        "{} migration(s) applied, {} already recorded",
                        report.applied.len(),
                        report.skipped
                    ));
                }
            } else {
                emit_json(&json!({ "applied": report.applied, "skipped": report.skipped }))?;
            }
        }

        Commands::Stats => {
            let session = Session::open(cli)?;
            let stats = session.store.stats()?;
            if human {
                ui::header(&format!("EveryPoll Statistics ({})", session.location()));
                let (users, polls, answers, votes) = (
                    stats.users.to_string(),
                    stats.polls.to_string(),
                    stats.answers.to_string(),
                    stats.votes.to_string(),
                );
                let table = ui::stats_table(&[
                    ("Users", users.as_str()),
                    ("Polls", polls.as_str()),
                    ("Answers", answers.as_str()),
                    ("Votes", votes.as_str()),
                ]);
                println!("{}", table);
            } else {
                emit_json(&stats)?;
            }
        }

        Commands::Polls { search, author, limit, offset } => {
            let session = Session::open(cli)?;
            let repos = session.repos();
            let page = Page::new(*limit, *offset);
            let polls = match (search, author) {
                (Some(text), Some(author)) => repos.polls.search_by_author(author, text, page)?,
                (Some(text), None) => repos.polls.search(text, page)?,
                (None, Some(author)) => repos.polls.get_by_author(author, page)?,
                (None, None) => repos.polls.get_all(page)?,
            };
            if human {
                if polls.is_empty() {
                    println!("{} No polls found.", Icons::EMPTY);
                } else {
                    println!("{}", ui::poll_table(&polls));
                }
            } else {
                emit_json(&polls)?;
            }
        }

        Commands::Show { poll } => {
            let session = Session::open(cli)?;
            let repos = session.repos();
            let detail = repos.polls.get_with_answers(poll)?;
            let author = repos.users.public_profile(&detail.poll.author_id)?;
            let counts = repos.votes.count_votes_by_answer(poll)?;
            let total = repos.votes.count_total_votes(poll)?;

            if human {
                ui::header(&detail.poll.question);
                ui::status(
                    Icons::PERSON,
                    "Author",
                    author.name.as_deref().unwrap_or(&author.id),
                );
                ui::status(Icons::STATS, "Votes", &total.to_string());
                println!("{}", ui::tally_table(&detail.answers, &counts));
            } else {
                emit_json(&json!({
                    "poll": detail.poll,
                    "answers": detail.answers,
                    "author": author,
                    "votes": counts,
                    "total": total,
                }))?;
            }
        }

        Commands::Crossref { target, references } => {
            let session = Session::open(cli)?;
            let target_poll = session.repos().polls.get_with_answers(target)?;
            let engine = CrossReferenceEngine::new(&session.store);
            let records = engine.cross_reference(target, references);

            if human {
                ui::header(&format!("Cross-reference: {}", target_poll.poll.question));
                if records.is_empty() {
                    println!("{} No admissible references.", Icons::EMPTY);
                }
                for record in &records {
                    let label = match &record.answer {
                        Some(answer) => format!("{} = {}", record.poll.question, answer.text),
                        None => record.poll.question.clone(),
                    };
                    ui::section(&format!(" {} {} ", Icons::LINK, label));
                    println!("{}", ui::tally_table(&target_poll.answers, &record.votes));
                }
                if records.len() < references.len() {
                    ui::warn(&format!(
                        "{} reference(s) skipped",
                        references.len() - records.len()
                    ));
                }
            } else {
                emit_json(&records)?;
            }
        }
    }

    Ok(())
}
