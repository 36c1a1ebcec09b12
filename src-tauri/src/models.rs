use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlashcardError;

/// Category assigned to cards imported or created without one.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

pub fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub front: String,
    pub back: String,
    #[serde(default = "default_category")]
    pub category: String,
    /// Last rating given to the card. `None` means the card was never rated ("new").
    #[serde(default)]
    pub difficulty: Option<Rating>,
    #[serde(default)]
    pub last_reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_count: u32,
    /// Absent until the first rating; an unscheduled card is never due on its own.
    #[serde(default)]
    pub next_review_at: Option<DateTime<Utc>>,
    /// Interval (days) that produced `next_review_at`. Absent for a never-rated card.
    #[serde(default)]
    pub last_interval: Option<u32>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Card {
    pub fn new(front: impl Into<String>, back: impl Into<String>, category: Option<String>) -> Self {
        Card {
            id: Uuid::new_v4().to_string(),
            front: front.into(),
            back: back.into(),
            category: normalize_category(category),
            difficulty: None,
            last_reviewed_at: None,
            review_count: 0,
            next_review_at: None,
            last_interval: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_new(&self) -> bool {
        self.difficulty.is_none()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_at.is_some_and(|at| at <= now)
    }

    /// Interval fed to the scheduler; a never-rated card starts from 0.
    pub fn prior_interval(&self) -> u32 {
        self.last_interval.unwrap_or(0)
    }

    pub fn apply(&mut self, patch: &CardPatch) {
        if let Some(front) = &patch.front {
            self.front = front.clone();
        }
        if let Some(back) = &patch.back {
            self.back = back.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(difficulty) = patch.difficulty {
            self.difficulty = Some(difficulty);
        }
        if let Some(at) = patch.last_reviewed_at {
            self.last_reviewed_at = Some(at);
        }
        if let Some(count) = patch.review_count {
            self.review_count = count;
        }
        if let Some(at) = patch.next_review_at {
            self.next_review_at = Some(at);
        }
        if let Some(interval) = patch.last_interval {
            self.last_interval = Some(interval);
        }
    }
}

/// Empty or whitespace-only categories collapse to [`DEFAULT_CATEGORY`].
pub fn normalize_category(category: Option<String>) -> String {
    match category {
        Some(c) if !c.trim().is_empty() => c.trim().to_string(),
        _ => default_category(),
    }
}

/// Difficulty feedback given to the card currently under review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Easy,
    Medium,
    Hard,
}

impl Rating {
    /// Keyboard mapping: 1 easy, 2 medium, 3 hard.
    pub fn from_u8(value: u8) -> Result<Self, FlashcardError> {
        match value {
            1 => Ok(Rating::Easy),
            2 => Ok(Rating::Medium),
            3 => Ok(Rating::Hard),
            _ => Err(FlashcardError::InvalidRating(value.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Easy => "easy",
            Rating::Medium => "medium",
            Rating::Hard => "hard",
        }
    }
}

impl FromStr for Rating {
    type Err = FlashcardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Rating::Easy),
            "medium" => Ok(Rating::Medium),
            "hard" => Ok(Rating::Hard),
            _ => Err(FlashcardError::InvalidRating(s.to_string())),
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Difficulty filter used when building a standard session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyBucket {
    #[default]
    All,
    New,
    Easy,
    Medium,
    Hard,
}

impl DifficultyBucket {
    pub fn matches(&self, card: &Card) -> bool {
        match self {
            DifficultyBucket::All => true,
            DifficultyBucket::New => card.difficulty.is_none(),
            DifficultyBucket::Easy => card.difficulty == Some(Rating::Easy),
            DifficultyBucket::Medium => card.difficulty == Some(Rating::Medium),
            DifficultyBucket::Hard => card.difficulty == Some(Rating::Hard),
        }
    }
}

impl FromStr for DifficultyBucket {
    type Err = FlashcardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(DifficultyBucket::All),
            "new" => Ok(DifficultyBucket::New),
            "easy" => Ok(DifficultyBucket::Easy),
            "medium" => Ok(DifficultyBucket::Medium),
            "hard" => Ok(DifficultyBucket::Hard),
            other => Err(FlashcardError::InvalidInput(format!("Unknown difficulty filter: {}", other))),
        }
    }
}

/// Partial card update. Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Rating>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_review_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_interval: Option<u32>,
}

impl CardPatch {
    pub fn is_empty(&self) -> bool {
        *self == CardPatch::default()
    }
}

/// Card content before it is given an id by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCard {
    pub front: String,
    pub back: String,
    #[serde(default = "default_category")]
    pub category: String,
}

impl NewCard {
    pub fn new(front: impl Into<String>, back: impl Into<String>, category: Option<String>) -> Self {
        NewCard {
            front: front.into(),
            back: back.into(),
            category: normalize_category(category),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.front.trim().is_empty() && !self.back.trim().is_empty()
    }

    pub fn into_card(self) -> Card {
        Card::new(self.front, self.back, Some(self.category))
    }
}

impl From<&Card> for NewCard {
    fn from(card: &Card) -> Self {
        NewCard {
            front: card.front.clone(),
            back: card.back.clone(),
            category: card.category.clone(),
        }
    }
}

/// Library-level counts shown above the review filters.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub total_cards: usize,
    pub cards_due: usize,
    pub cards_new: usize,
    pub cards_easy: usize,
    pub cards_medium: usize,
    pub cards_hard: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CategoryStats {
    pub name: String,
    pub total_cards: usize,
    pub cards_due: usize,
    pub cards_new: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkUpdateRequest {
    pub card_ids: Vec<String>,
    pub category: String,
}
