use crate::models::{Card, CategoryStats, DifficultyBucket, Rating, ReviewStats};
use chrono::{DateTime, Days, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};

/// Interval-growth scheduler: easy and medium ratings stretch the interval, hard resets it to a day.
pub struct SpacedRepetition;

/// Outcome of scheduling one rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleResult {
    pub next_review_at: DateTime<Utc>,
    pub interval: u32, // days, always >= 1
}

impl SpacedRepetition {
    /// New interval in days for `rating` given the interval that produced the last review.
    pub fn next_interval(prior_interval: u32, rating: Rating) -> u32 {
        let prior = u64::from(prior_interval);
        let days = match rating {
            Rating::Hard => 1,
            // ceil(prior * 1.5), floored at 2
            Rating::Medium => ((3 * prior + 1) / 2).max(2),
            Rating::Easy if prior == 0 => 4,
            // ceil(prior * 2.5)
            Rating::Easy => (5 * prior + 1) / 2,
        };
        u32::try_from(days).unwrap_or(u32::MAX)
    }

    /// Calculate next review parameters relative to `now`, in `now`'s own time zone.
    ///
    /// The due date is `now` moved forward by whole calendar days, keeping the wall-clock time,
    /// so a DST change in between does not shift the review by an hour.
    pub fn calculate_next_review<Tz: TimeZone>(prior_interval: u32, rating: Rating, now: &DateTime<Tz>) -> ScheduleResult {
        let interval = Self::next_interval(prior_interval, rating);
        ScheduleResult {
            next_review_at: add_calendar_days(now, interval),
            interval,
        }
    }

    /// Due cards ordered by how long they have been waiting.
    pub fn get_due_cards_from_vec(cards: &[Card], now: DateTime<Utc>) -> Vec<Card> {
        let mut due: Vec<Card> = cards.iter().filter(|card| card.is_due(now)).cloned().collect();
        due.sort_by_key(|card| card.next_review_at);
        due
    }

    /// Calculate library statistics
    pub fn calculate_stats<'a>(cards: impl IntoIterator<Item = &'a Card>, now: DateTime<Utc>) -> ReviewStats {
        let mut stats = ReviewStats::default();
        for card in cards {
            stats.total_cards += 1;
            if card.is_due(now) {
                stats.cards_due += 1;
            }
            match card.difficulty {
                None => stats.cards_new += 1,
                Some(Rating::Easy) => stats.cards_easy += 1,
                Some(Rating::Medium) => stats.cards_medium += 1,
                Some(Rating::Hard) => stats.cards_hard += 1,
            }
        }
        stats
    }

    /// Distinct categories, sorted by name.
    pub fn categories<'a>(cards: impl IntoIterator<Item = &'a Card>) -> Vec<String> {
        let mut categories: Vec<String> = cards
            .into_iter()
            .map(|card| card.category.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        categories.sort();
        categories
    }

    /// Per-category totals, largest category first.
    pub fn category_stats<'a>(cards: impl IntoIterator<Item = &'a Card>, now: DateTime<Utc>) -> Vec<CategoryStats> {
        let mut category_map: HashMap<&str, Vec<&Card>> = HashMap::new();
        for card in cards {
            category_map.entry(card.category.as_str()).or_default().push(card);
        }

        let mut stats: Vec<CategoryStats> = category_map
            .into_iter()
            .map(|(name, cards)| CategoryStats {
                name: name.to_string(),
                total_cards: cards.len(),
                cards_due: cards.iter().filter(|c| c.is_due(now)).count(),
                cards_new: cards.iter().filter(|c| c.is_new()).count(),
            })
            .collect();

        stats.sort_by(|a, b| b.total_cards.cmp(&a.total_cards).then_with(|| a.name.cmp(&b.name)));
        stats
    }

    /// Number of cards a standard session with these filters would contain.
    pub fn count_matching<'a>(
        cards: impl IntoIterator<Item = &'a Card>,
        category: Option<&str>,
        difficulty: DifficultyBucket,
    ) -> usize {
        cards
            .into_iter()
            .filter(|c| category.map_or(true, |cat| c.category == cat) && difficulty.matches(c))
            .count()
    }
}

/// Add whole days on the local calendar of `now`.
///
/// A target that falls into a DST gap has no local representation; it is then computed
/// as elapsed time instead.
pub fn add_calendar_days<Tz: TimeZone>(now: &DateTime<Tz>, days: u32) -> DateTime<Utc> {
    let tz = now.timezone();
    now.naive_local()
        .checked_add_days(Days::new(u64::from(days)))
        .and_then(|target| tz.from_local_datetime(&target).earliest())
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc) + Duration::days(i64::from(days)))
}
