use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::card_store::CardStore;
use crate::error::{FlashcardError, Result};
use crate::models::{CardPatch, Rating};
use crate::progress::{resume_or_start, ProgressStore};
use crate::session::{daily_pool, Advance, RatingOutcome, Session, SessionFilter};

/// A card-store write that did not go through.
#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub card_id: String,
    pub error: String,
}

enum Write {
    Update { card_id: String, patch: CardPatch },
    Flush(oneshot::Sender<()>),
}

// One write at a time, in queue order.
async fn write_worker(
    store: Arc<dyn CardStore>,
    mut queue: mpsc::UnboundedReceiver<Write>,
    failures: mpsc::UnboundedSender<SyncFailure>,
) {
    while let Some(write) = queue.recv().await {
        match write {
            Write::Update { card_id, patch } => {
                if let Err(e) = store.update_card(&card_id, &patch).await {
                    warn!("Failed to save review of card {}: {}", card_id, e);
                    let _ = failures.send(SyncFailure {
                        card_id,
                        error: e.to_string(),
                    });
                }
            }
            Write::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Owns the one active study session. The session is updated and snapshotted first; the
/// card-store write for a rating is queued and reported on the failure channel if it fails.
pub struct StudyController {
    store: Arc<dyn CardStore>,
    progress: ProgressStore,
    session: Option<Session>,
    writes: mpsc::UnboundedSender<Write>,
    failures: mpsc::UnboundedSender<SyncFailure>,
}

impl StudyController {
    /// Must be called from within a Tokio runtime.
    pub fn new(store: Arc<dyn CardStore>, progress: ProgressStore) -> Result<(Self, mpsc::UnboundedReceiver<SyncFailure>)> {
        let runtime = Handle::try_current().map_err(|e| FlashcardError::Config(format!("No async runtime: {}", e)))?;
        let (failures, receiver) = mpsc::unbounded_channel();
        let (writes, queue) = mpsc::unbounded_channel();
        runtime.spawn(write_worker(store.clone(), queue, failures.clone()));

        let controller = StudyController {
            store,
            progress,
            session: None,
            writes,
            failures,
        };
        Ok((controller, receiver))
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn active(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(FlashcardError::NoActiveSession)
    }

    fn snapshot(&self) {
        if let Some(session) = &self.session {
            if let Err(e) = self.progress.save_session(session) {
                warn!("Failed to save review progress: {}", e);
            }
        }
    }

    fn begin(&mut self, session: Session) -> Result<&Session> {
        self.session = Some(session);
        self.snapshot();
        self.session.as_ref().ok_or(FlashcardError::NoActiveSession)
    }

    /// Start a standard or due session, resuming saved progress for the same filter when
    /// `resume` is set.
    pub async fn start_review(&mut self, filter: SessionFilter, resume: bool) -> Result<&Session> {
        let all_cards = self.store.get_cards().await?;
        let pool = match &filter {
            SessionFilter::Due { limit } => self.store.get_due_cards(*limit).await?,
            _ => all_cards.clone(),
        };
        let snapshot = if resume { self.progress.load()? } else { None };

        let session = resume_or_start(pool, &all_cards, filter, snapshot.as_ref(), &mut rand::rng())?;
        self.begin(session)
    }

    /// Start a session over a random sample of `count` cards from `categories`
    /// (every category when empty).
    pub async fn start_daily_review(&mut self, categories: &[String], count: usize) -> Result<&Session> {
        let all_cards = self.store.get_cards().await?;
        let mut rng = rand::rng();
        let pool = daily_pool(&all_cards, categories, count, &mut rng)?;
        let filter = SessionFilter::Explicit {
            card_ids: pool.iter().map(|c| c.id.clone()).collect(),
        };
        let session = Session::start(pool, filter, &mut rng)?;
        self.begin(session)
    }

    pub fn flip(&mut self) -> Result<bool> {
        Ok(self.active()?.flip())
    }

    pub fn next(&mut self) -> Result<Advance> {
        let advance = self.active()?.advance();
        self.snapshot();
        Ok(advance)
    }

    pub fn previous(&mut self) -> Result<bool> {
        let moved = self.active()?.retreat();
        self.snapshot();
        Ok(moved)
    }

    /// Rate the current card. The session moves on immediately; the card-store write
    /// is queued behind earlier ones.
    pub fn rate(&mut self, rating: Rating) -> Result<RatingOutcome> {
        let outcome = self.active()?.rate_now(rating);
        self.snapshot();

        let card_id = outcome.card.id.clone();
        let write = Write::Update {
            card_id: card_id.clone(),
            patch: outcome.patch.clone(),
        };
        if self.writes.send(write).is_err() {
            warn!("Card write queue is closed; review of card {} was not saved", card_id);
            let _ = self.failures.send(SyncFailure {
                card_id,
                error: "Card write queue is closed".to_string(),
            });
        }
        Ok(outcome)
    }

    /// Rate by raw name ("easy", "medium", "hard"). Unknown names fail without touching the session.
    pub fn rate_named(&mut self, rating: &str) -> Result<RatingOutcome> {
        let rating: Rating = rating.parse()?;
        self.rate(rating)
    }

    /// Wait for card-store writes queued so far.
    pub async fn flush(&self) {
        let (done, finished) = oneshot::channel();
        if self.writes.send(Write::Flush(done)).is_ok() {
            let _ = finished.await;
        }
    }

    /// End the active session. The saved progress is cleared unless `keep_progress` is set.
    pub async fn exit(&mut self, keep_progress: bool) -> Result<Option<Session>> {
        self.flush().await;
        let session = self.session.take();
        if let Some(session) = &session {
            info!(
                "Leaving session at card {} of {} ({} mastered)",
                session.cursor() + 1,
                session.len(),
                session.mastered_count()
            );
        }
        if !keep_progress {
            self.progress.clear()?;
        }
        Ok(session)
    }
}
