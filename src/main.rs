mod db;
mod error;
mod models;
mod review;
mod srs;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use db::Database;
use error::SrsError;
use models::{Card, JsonOutput, Rating};
use review::CommitResult;

const DEFAULT_DB_NAME: &str = "lexidrill.db";
const DEFAULT_LEARNER: &str = "default";
const DEFAULT_QUEUE_LIMIT: usize = 20;

#[derive(Parser)]
#[command(name = "lexidrill")]
#[command(about = "Spaced-repetition vocabulary scheduler for language learners")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage vocabulary cards
    #[command(subcommand)]
    Word(WordCommands),

    /// Show the review queue (most overdue first)
    Due {
        /// Maximum queue length
        #[arg(long, short, default_value_t = DEFAULT_QUEUE_LIMIT)]
        limit: usize,

        /// Learner whose cards to query
        #[arg(long, default_value = DEFAULT_LEARNER)]
        learner: String,
    },

    /// Show the intake queue of never-reviewed cards
    New {
        /// Maximum queue length
        #[arg(long, short, default_value_t = DEFAULT_QUEUE_LIMIT)]
        limit: usize,

        /// Learner whose cards to query
        #[arg(long, default_value = DEFAULT_LEARNER)]
        learner: String,
    },

    /// Preview what each rating would schedule, without committing
    Preview {
        /// Card ID
        id: i64,
    },

    /// Commit a review rating for a card
    Review {
        /// Card ID
        id: i64,

        /// Rating: again/hard/good/easy
        #[arg(long, short)]
        rating: String,

        /// Review time as RFC 3339, defaults to now
        #[arg(long)]
        at: Option<String>,
    },

    /// Commit one rating for several cards (e.g. after a game round)
    BatchReview {
        /// Comma-separated card IDs
        #[arg(long, short)]
        ids: String,

        /// Rating: again/hard/good/easy
        #[arg(long, short)]
        rating: String,
    },

    /// Show a card's mastery status (recomputed, not the cached value)
    Status {
        /// Card ID
        id: i64,
    },

    /// Show learning statistics
    Stats {
        /// Learner whose cards to query
        #[arg(long, default_value = DEFAULT_LEARNER)]
        learner: String,
    },
}

#[derive(Subcommand)]
enum WordCommands {
    /// Add a word, creating its card at step 0
    Add {
        /// The word to learn
        word: String,

        /// Learner the card belongs to
        #[arg(long, default_value = DEFAULT_LEARNER)]
        learner: String,
    },

    /// List all cards
    List {
        /// Learner whose cards to list
        #[arg(long, default_value = DEFAULT_LEARNER)]
        learner: String,
    },

    /// Show card details
    Show {
        /// Card ID
        id: i64,
    },

    /// Delete a card
    Delete {
        /// Card ID
        id: i64,
    },
}

fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("LEXIDRILL_DB") {
        return PathBuf::from(path);
    }

    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lexidrill");

    std::fs::create_dir_all(&config_dir).ok();
    config_dir.join(DEFAULT_DB_NAME)
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = get_db_path();
    let db = Database::open(&db_path)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Word(word_cmd) => match word_cmd {
            WordCommands::Add { word, learner } => {
                let id = db.add_card(&learner, &word, Utc::now())?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "word": word,
                            "learner": learner,
                        })))?
                    );
                } else {
                    println!("Added '{}' with card ID: {}", word, id);
                }
            }

            WordCommands::List { learner } => {
                let cards = db.list_cards(&learner)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&cards))?);
                } else if cards.is_empty() {
                    println!("No cards found.");
                } else {
                    print_card_table(&cards);
                }
            }

            WordCommands::Show { id } => {
                if let Some(card) = db.get_card(id)? {
                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::ok(&card))?);
                    } else {
                        print_card_detail(&card);
                    }
                } else if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::<()>::err("Card not found"))?
                    );
                } else {
                    println!("Card not found.");
                }
            }

            WordCommands::Delete { id } => {
                if db.delete_card(id)? {
                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                    } else {
                        println!("Card {} deleted.", id);
                    }
                } else if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::<()>::err("Card not found"))?
                    );
                } else {
                    println!("Card not found.");
                }
            }
        },

        Commands::Due { limit, learner } => {
            let queue = review::due_queue(&db, &learner, Utc::now(), limit)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&queue))?);
            } else if queue.is_empty() {
                println!("Nothing due. Come back later.");
            } else {
                print_card_table(&queue);
            }
        }

        Commands::New { limit, learner } => {
            let queue = review::new_queue(&db, &learner, limit)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&queue))?);
            } else if queue.is_empty() {
                println!("No new cards to introduce.");
            } else {
                print_card_table(&queue);
            }
        }

        Commands::Preview { id } => {
            let card = db.get_card(id)?.ok_or(SrsError::CardNotFound(id))?;
            let intervals = review::preview(&card);
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                        "card_id": card.id,
                        "word": card.word,
                        "step": card.step,
                        "interval_secs": {
                            "again": intervals.again.num_seconds(),
                            "hard": intervals.hard.num_seconds(),
                            "good": intervals.good.num_seconds(),
                            "easy": intervals.easy.num_seconds(),
                        },
                    })))?
                );
            } else {
                println!("'{}' (step {}):", card.word, card.step);
                for rating in Rating::ALL {
                    println!("  {:<6} -> {}", rating.as_str(), humanize(intervals.get(rating)));
                }
            }
        }

        Commands::Review { id, rating, at } => {
            let rating =
                Rating::from_str(&rating).ok_or_else(|| SrsError::InvalidRating(rating.clone()))?;
            let now = match at {
                Some(s) => DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc),
                None => Utc::now(),
            };

            let result = review::commit(&db, id, rating, now)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(commit_summary(&result)))?
                );
            } else {
                println!(
                    "Reviewed '{}' as {}: step {} -> {}, next due {}, status {}",
                    result.next.word,
                    rating.as_str(),
                    result.previous.step,
                    result.next.step,
                    result.next.due_at.to_rfc3339(),
                    result.next.mastery.label(),
                );
            }
        }

        Commands::BatchReview { ids, rating } => {
            let rating =
                Rating::from_str(&rating).ok_or_else(|| SrsError::InvalidRating(rating.clone()))?;
            let card_ids = parse_id_list(&ids)?;

            let outcome = review::commit_batch(&db, &card_ids, rating, Utc::now())?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&outcome))?);
            } else {
                println!(
                    "Committed {} for {} card(s), {} failed.",
                    rating.as_str(),
                    outcome.applied.len(),
                    outcome.failed.len()
                );
                for failure in &outcome.failed {
                    println!("  card {}: {}", failure.card_id, failure.error);
                }
            }
        }

        Commands::Status { id } => {
            let card = db.get_card(id)?.ok_or(SrsError::CardNotFound(id))?;
            let mastery = srs::classify(&card);
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                        "card_id": card.id,
                        "word": card.word,
                        "mastery": mastery.as_str(),
                    })))?
                );
            } else {
                println!("'{}' is {}", card.word, mastery.label());
            }
        }

        Commands::Stats { learner } => {
            let stats = db.get_stats(&learner, Utc::now())?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&stats))?);
            } else {
                println!("Cards: {} total, {} new, {} due now", stats.total_cards, stats.new_cards, stats.due_now);
                println!(
                    "Status: {} learning, {} known, {} mastered",
                    stats.learning, stats.known, stats.mastered
                );
                println!(
                    "Reviews: {} correct, {} incorrect",
                    stats.total_correct, stats.total_incorrect
                );
            }
        }
    }

    Ok(())
}

fn commit_summary(result: &CommitResult) -> serde_json::Value {
    serde_json::json!({
        "card_id": result.next.id,
        "previous_step": result.previous.step,
        "new_step": result.next.step,
        "new_due_at": result.next.due_at.to_rfc3339(),
        "mastery": result.next.mastery.as_str(),
    })
}

fn parse_id_list(s: &str) -> Result<Vec<i64>, std::num::ParseIntError> {
    s.split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect()
}

fn print_card_table(cards: &[Card]) {
    println!("{:<5} {:<24} {:<5} {:<10} {}", "ID", "WORD", "STEP", "STATUS", "DUE");
    println!("{}", "-".repeat(70));
    for card in cards {
        let due = if card.is_new() {
            "-".to_string()
        } else {
            card.due_at.to_rfc3339()
        };
        println!(
            "{:<5} {:<24} {:<5} {:<10} {}",
            card.id,
            truncate(&card.word, 22),
            card.step,
            card.mastery.as_str(),
            due
        );
    }
}

fn print_card_detail(card: &Card) {
    println!("Word: {}", card.word);
    println!("ID: {}", card.id);
    println!("Learner: {}", card.learner);
    println!("Step: {}", card.step);
    println!("Status: {}", srs::classify(card).label());
    println!(
        "Reviews: {} correct, {} incorrect",
        card.correct_count, card.incorrect_count
    );
    if let Some(last) = card.last_reviewed_at {
        println!("Last reviewed: {}", last.to_rfc3339());
        println!("Next due: {}", card.due_at.to_rfc3339());
    } else {
        println!("Never reviewed.");
    }
    println!("Added: {}", card.created_at.to_rfc3339());
}

fn humanize(d: chrono::Duration) -> String {
    if d.num_days() >= 1 {
        format!("{}d", d.num_days())
    } else if d.num_hours() >= 1 {
        format!("{}h", d.num_hours())
    } else {
        format!("{}m", d.num_minutes().max(1))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
