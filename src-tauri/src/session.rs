use std::collections::HashSet;

use chrono::{DateTime, Local, TimeZone, Utc};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{FlashcardError, Result};
use crate::models::{Card, CardPatch, DifficultyBucket, Rating};
use crate::spaced_repetition::SpacedRepetition;

/// Selection criteria that produced a session. Kept for resume matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SessionFilter {
    /// `category: None` selects every category.
    Standard {
        category: Option<String>,
        difficulty: DifficultyBucket,
    },
    /// A curated list of cards, e.g. a daily review pool.
    Explicit { card_ids: Vec<String> },
    /// Cards fetched by the card store as due, topped up with new cards.
    Due { limit: usize },
}

impl SessionFilter {
    pub fn all() -> Self {
        SessionFilter::Standard {
            category: None,
            difficulty: DifficultyBucket::All,
        }
    }

    /// Keep the cards of `pool` this filter selects. Duplicate ids keep their first occurrence.
    pub fn select(&self, pool: Vec<Card>) -> Vec<Card> {
        let mut seen = HashSet::new();
        let unique = pool.into_iter().filter(|card| seen.insert(card.id.clone()));
        match self {
            SessionFilter::Standard { category, difficulty } => unique
                .filter(|card| category.as_ref().map_or(true, |cat| &card.category == cat))
                .filter(|card| difficulty.matches(card))
                .collect(),
            SessionFilter::Explicit { card_ids } => {
                let wanted: HashSet<&str> = card_ids.iter().map(String::as_str).collect();
                unique.filter(|card| wanted.contains(card.id.as_str())).collect()
            }
            SessionFilter::Due { limit } => unique.take(*limit).collect(),
        }
    }

    /// Whether a session saved under `self` may be resumed for a `requested` session.
    pub fn resumes(&self, requested: &SessionFilter) -> bool {
        match (self, requested) {
            (SessionFilter::Explicit { card_ids: saved }, SessionFilter::Explicit { card_ids: wanted }) => {
                let saved: HashSet<&String> = saved.iter().collect();
                let wanted: HashSet<&String> = wanted.iter().collect();
                saved == wanted
            }
            (saved, wanted) => saved == wanted,
        }
    }

    fn shuffles(&self) -> bool {
        !matches!(self, SessionFilter::Due { .. })
    }
}

/// Result of moving forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved,
    /// The cursor was already on the last card. The session stays active.
    Complete,
}

/// What a rating changed.
#[derive(Debug, Clone)]
pub struct RatingOutcome {
    /// The rated card after the update.
    pub card: Card,
    /// Fields to write back to the card store.
    pub patch: CardPatch,
    /// `None` when the card was requeued instead of advancing.
    pub advance: Option<Advance>,
}

/// Ordered cards plus a cursor. Hard ratings move the current card to the back.
#[derive(Debug, Clone)]
pub struct Session {
    cards: Vec<Card>,
    cursor: usize,
    filter: SessionFilter,
    revealed: bool,
    mastered_count: usize,
}

impl Session {
    /// Start a fresh session from `pool`.
    ///
    /// Standard and explicit sessions are shuffled; due sessions keep the store's order.
    pub fn start<R: Rng + ?Sized>(pool: Vec<Card>, filter: SessionFilter, rng: &mut R) -> Result<Self> {
        let mut cards = filter.select(pool);
        if cards.is_empty() {
            return Err(FlashcardError::EmptySelection);
        }
        if filter.shuffles() {
            cards.shuffle(rng);
        }
        info!("Starting session with {} cards ({:?})", cards.len(), filter);
        Ok(Self::from_parts(cards, 0, filter))
    }

    /// Build a session in an exact order, e.g. one restored from a snapshot.
    /// The cursor is clamped into range. `cards` must not be empty.
    pub(crate) fn from_parts(cards: Vec<Card>, cursor: usize, filter: SessionFilter) -> Self {
        let cursor = cursor.min(cards.len().saturating_sub(1));
        Session {
            cards,
            cursor,
            filter,
            revealed: false,
            mastered_count: 0,
        }
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn card_ids(&self) -> Vec<String> {
        self.cards.iter().map(|c| c.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn filter(&self) -> &SessionFilter {
        &self.filter
    }

    pub fn mastered_count(&self) -> usize {
        self.mastered_count
    }

    pub fn current(&self) -> &Card {
        &self.cards[self.cursor]
    }

    /// One-based position and total, for "Card i / n".
    pub fn position(&self) -> (usize, usize) {
        (self.cursor + 1, self.cards.len())
    }

    pub fn is_last(&self) -> bool {
        self.cursor + 1 >= self.cards.len()
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    /// Toggle between question and answer.
    pub fn flip(&mut self) -> bool {
        self.revealed = !self.revealed;
        self.revealed
    }

    pub fn advance(&mut self) -> Advance {
        if self.is_last() {
            debug!("Reached the end of the session");
            return Advance::Complete;
        }
        self.cursor += 1;
        self.revealed = false;
        Advance::Moved
    }

    /// Step back one card. Returns false on the first card.
    pub fn retreat(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.revealed = false;
        true
    }

    /// Rate the current card at `now` (in the user's time zone).
    pub fn rate<Tz: TimeZone>(&mut self, rating: Rating, now: &DateTime<Tz>) -> RatingOutcome {
        let card = &mut self.cards[self.cursor];
        let schedule = SpacedRepetition::calculate_next_review(card.prior_interval(), rating, now);
        let patch = CardPatch {
            difficulty: Some(rating),
            last_reviewed_at: Some(now.with_timezone(&Utc)),
            review_count: Some(card.review_count.saturating_add(1)),
            next_review_at: Some(schedule.next_review_at),
            last_interval: Some(schedule.interval),
            ..Default::default()
        };
        card.apply(&patch);
        let card = card.clone();

        let advance = match rating {
            Rating::Easy => {
                self.mastered_count += 1;
                Some(self.advance())
            }
            Rating::Medium => Some(self.advance()),
            Rating::Hard => {
                self.requeue();
                None
            }
        };

        RatingOutcome { card, patch, advance }
    }

    pub fn rate_now(&mut self, rating: Rating) -> RatingOutcome {
        self.rate(rating, &Local::now())
    }

    /// Move the current card to the end of the queue. The cursor stays put, so the
    /// following card becomes current; on the last card it stays on the last slot.
    fn requeue(&mut self) {
        let card = self.cards.remove(self.cursor);
        debug!("Requeued card {}", card.id);
        self.cards.push(card);
        if self.cursor >= self.cards.len() {
            self.cursor = self.cards.len() - 1;
        }
        self.revealed = false;
    }
}

/// Random sample of up to `count` cards from the chosen categories (all cards when
/// `categories` is empty), for a daily review.
pub fn daily_pool<R: Rng + ?Sized>(cards: &[Card], categories: &[String], count: usize, rng: &mut R) -> Result<Vec<Card>> {
    let mut eligible: Vec<Card> = cards
        .iter()
        .filter(|card| categories.is_empty() || categories.contains(&card.category))
        .cloned()
        .collect();
    if eligible.is_empty() {
        return Err(FlashcardError::EmptySelection);
    }
    eligible.shuffle(rng);
    eligible.truncate(count.max(1));
    Ok(eligible)
}
