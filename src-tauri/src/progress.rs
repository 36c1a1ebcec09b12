use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Card;
use crate::session::{Session, SessionFilter};
use crate::storage::{load_json, save_json, KeyValueStore, PROGRESS_KEY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub filter: SessionFilter,
    pub cursor: usize,
    /// Session order at the time of the snapshot, including requeues.
    pub card_ids: Vec<String>,
    pub saved_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn of(session: &Session) -> Self {
        ProgressSnapshot {
            filter: session.filter().clone(),
            cursor: session.cursor(),
            card_ids: session.card_ids(),
            saved_at: Utc::now(),
        }
    }

    /// Rebuild the saved session from the cards that still exist in `lookup`.
    ///
    /// Returns `None` when the snapshot was taken for a different filter or none of its
    /// cards remain.
    pub fn restore(&self, requested: &SessionFilter, lookup: &[Card]) -> Option<Session> {
        if !self.filter.resumes(requested) {
            debug!("Discarding saved progress: filter {:?} does not match {:?}", self.filter, requested);
            return None;
        }

        let by_id: HashMap<&str, &Card> = lookup.iter().map(|c| (c.id.as_str(), c)).collect();
        let cards: Vec<Card> = self
            .card_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|c| (*c).clone()))
            .collect();

        if cards.is_empty() {
            debug!("Discarding saved progress: none of its {} cards remain", self.card_ids.len());
            return None;
        }
        if cards.len() < self.card_ids.len() {
            debug!("{} cards from saved progress no longer exist", self.card_ids.len() - cards.len());
        }

        Some(Session::from_parts(cards, self.cursor, requested.clone()))
    }
}

/// Start a session for `filter`, resuming `snapshot` when it still applies.
///
/// `lookup` is every card the snapshot may refer to; `pool` is the candidate set a fresh
/// session is drawn from.
pub fn resume_or_start<R: Rng + ?Sized>(
    pool: Vec<Card>,
    lookup: &[Card],
    filter: SessionFilter,
    snapshot: Option<&ProgressSnapshot>,
    rng: &mut R,
) -> Result<Session> {
    if let Some(session) = snapshot.and_then(|s| s.restore(&filter, lookup)) {
        info!("Resuming session at card {} of {}", session.cursor() + 1, session.len());
        return Ok(session);
    }
    Session::start(pool, filter, rng)
}

/// Persists the snapshot of the one active session.
#[derive(Clone)]
pub struct ProgressStore {
    storage: Arc<dyn KeyValueStore>,
}

impl ProgressStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        ProgressStore { storage }
    }

    pub fn save(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        save_json(self.storage.as_ref(), PROGRESS_KEY, snapshot)
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        self.save(&ProgressSnapshot::of(session))
    }

    /// The saved snapshot, or `None` if there is none or it is malformed.
    pub fn load(&self) -> Result<Option<ProgressSnapshot>> {
        let snapshot: Option<ProgressSnapshot> = load_json(self.storage.as_ref(), PROGRESS_KEY)?;
        Ok(snapshot.filter(|s| !s.card_ids.is_empty()))
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.clear(PROGRESS_KEY)
    }
}
