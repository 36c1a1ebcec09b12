mod app;
mod review;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use flashdeck_lib::card_store::{sync_cards, CardStore};
use flashdeck_lib::csv_import::{self, CategorySource, ColumnMapping};
use flashdeck_lib::models::DifficultyBucket;
use flashdeck_lib::session::SessionFilter;
use flashdeck_lib::study::StudyController;

#[derive(Parser)]
#[command(name = "flashdeck-cli", about = "Flashcard study with spaced repetition", version)]
struct Cli {
    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Import cards from a CSV file
    Import {
        /// CSV file with a header row
        file: std::path::PathBuf,
        /// Column holding the question (0-based)
        #[arg(long)]
        front: Option<usize>,
        /// Column holding the answer (0-based)
        #[arg(long)]
        back: Option<usize>,
        /// Column holding the category (0-based)
        #[arg(long, conflicts_with = "custom_category")]
        category_column: Option<usize>,
        /// Put every imported card in this category
        #[arg(long)]
        custom_category: Option<String>,
    },

    /// List cards
    List {
        /// Only cards in this category
        #[arg(long)]
        category: Option<String>,
    },

    /// Show library and per-category statistics
    Stats,

    /// Study cards, resuming saved progress for the same selection
    Study {
        /// Only cards in this category
        #[arg(long)]
        category: Option<String>,
        /// all, new, easy, medium or hard
        #[arg(long, default_value = "all")]
        difficulty: DifficultyBucket,
        /// Ignore saved progress and start over
        #[arg(long)]
        fresh: bool,
    },

    /// Study a random sample from some categories
    Daily {
        /// Comma-separated categories (default: all)
        #[arg(long)]
        categories: Option<String>,
        /// Number of cards (default: from settings)
        #[arg(long)]
        count: Option<usize>,
    },

    /// Study cards that are due, topped up with new cards
    Due {
        /// Maximum cards (default: from settings)
        #[arg(long)]
        limit: Option<usize>,
        /// Ignore saved progress and start over
        #[arg(long)]
        fresh: bool,
    },

    /// Upload every local card to the remote store
    Sync,

    /// Move cards to another category
    Move {
        /// Target category
        category: String,
        /// Card ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete cards
    Delete {
        /// Card ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete all local cards and saved progress
    Clear {
        /// Skip the confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let app = app::App::new()?;

    match cli.command {
        Command::Import {
            file,
            front,
            back,
            category_column,
            custom_category,
        } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let parsed = csv_import::parse(&text)?;
            if parsed.is_empty() {
                bail!("{} has no rows", file.display());
            }

            let mut mapping = ColumnMapping::default_for(&parsed.headers);
            if let Some(front) = front {
                mapping.front = front;
            }
            if let Some(back) = back {
                mapping.back = back;
            }
            if let Some(column) = category_column {
                mapping.category = CategorySource::Column(column);
            } else if let Some(name) = custom_category {
                mapping.category = CategorySource::Custom(name);
            }

            let cards = csv_import::build_cards(&parsed, &mapping)?;
            let added = app.store().add_cards(cards).await?;
            println!("Imported {} cards from {}", added.len(), file.display());
        }
        Command::List { category } => {
            let mut cards = app.store().get_cards().await?;
            if let Some(category) = &category {
                cards.retain(|c| &c.category == category);
            }
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&cards)?),
                OutputFormat::Plain => {
                    for card in &cards {
                        let rating = card.difficulty.map(|r| r.to_string()).unwrap_or_else(|| "new".to_string());
                        println!("{}  [{}] ({})  {} -> {}", card.id, card.category, rating, card.front, card.back);
                    }
                    println!("{} cards", cards.len());
                }
            }
        }
        Command::Stats => {
            let now = Utc::now();
            let store = app.store();
            let stats = store.get_review_stats(now).await?;
            let categories = store.get_category_stats(now).await?;
            match cli.format {
                OutputFormat::Json => {
                    let output = serde_json::json!({ "stats": stats, "categories": categories });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Plain => {
                    println!(
                        "{} cards: {} due, {} new, {} easy, {} medium, {} hard",
                        stats.total_cards, stats.cards_due, stats.cards_new, stats.cards_easy, stats.cards_medium, stats.cards_hard
                    );
                    for category in &categories {
                        println!(
                            "  {}: {} cards, {} due, {} new",
                            category.name, category.total_cards, category.cards_due, category.cards_new
                        );
                    }
                }
            }
        }
        Command::Study {
            category,
            difficulty,
            fresh,
        } => {
            let filter = SessionFilter::Standard { category, difficulty };
            let (mut study, failures) = StudyController::new(app.store(), app.progress.clone())?;
            study.start_review(filter, !fresh).await?;
            review::run(&mut study, failures).await?;
        }
        Command::Daily { categories, count } => {
            let categories: Vec<String> = categories
                .map(|c| c.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default();
            let count = count.unwrap_or(app.settings.daily_review_count);
            let (mut study, failures) = StudyController::new(app.store(), app.progress.clone())?;
            study.start_daily_review(&categories, count).await?;
            review::run(&mut study, failures).await?;
        }
        Command::Due { limit, fresh } => {
            let limit = limit.unwrap_or(app.settings.due_limit);
            let (mut study, failures) = StudyController::new(app.store(), app.progress.clone())?;
            study.start_review(SessionFilter::Due { limit }, !fresh).await?;
            review::run(&mut study, failures).await?;
        }
        Command::Sync => {
            let remote = app
                .remote
                .as_ref()
                .context("No remote store configured (set FLASHDECK_SUPABASE_URL and FLASHDECK_SUPABASE_ANON_KEY)")?;
            let count = sync_cards(app.local.as_ref(), remote.as_ref()).await?;
            println!("Uploaded {} cards", count);
        }
        Command::Move { category, ids } => {
            app.store().update_category(&ids, &category).await?;
            println!("Moved {} cards to {}", ids.len(), category);
        }
        Command::Delete { ids } => {
            app.store().delete_cards(&ids).await?;
            println!("Deleted {} cards", ids.len());
        }
        Command::Clear { yes } => {
            if !yes && !review::confirm("Delete all cards and saved progress?")? {
                return Ok(());
            }
            app.service().clear_all()?;
            app.progress.clear()?;
            println!("Cleared all data");
        }
    }

    Ok(())
}
