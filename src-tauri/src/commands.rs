use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tauri::State;
use tokio::sync::Mutex;

use crate::card_store::{sync_cards, CardStore, LocalCardStore};
use crate::config::AppSettings;
use crate::csv_import::{self, ColumnMapping};
use crate::error::FlashcardError;
use crate::models::{BulkUpdateRequest, Card, CategoryStats, DifficultyBucket, ReviewStats};
use crate::remote::RemoteCardStore;
use crate::session::{Advance, Session, SessionFilter};
use crate::study::StudyController;

pub struct AppState {
    settings: AppSettings,
    local: Arc<LocalCardStore>,
    remote: Option<Arc<RemoteCardStore>>,
    store: Arc<dyn CardStore>,
    study: Mutex<StudyController>,
}

impl AppState {
    pub fn new(
        settings: AppSettings,
        local: Arc<LocalCardStore>,
        remote: Option<Arc<RemoteCardStore>>,
        store: Arc<dyn CardStore>,
        study: StudyController,
    ) -> Self {
        AppState {
            settings,
            local,
            remote,
            store,
            study: Mutex::new(study),
        }
    }
}

/// What the review screen shows.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub card: Card,
    pub position: usize,
    pub total: usize,
    pub revealed: bool,
    pub mastered_count: usize,
    pub complete: bool,
}

impl SessionView {
    fn of(session: &Session, complete: bool) -> Self {
        let (position, total) = session.position();
        SessionView {
            card: session.current().clone(),
            position,
            total,
            revealed: session.is_revealed(),
            mastered_count: session.mastered_count(),
            complete,
        }
    }
}

fn current_view(study: &StudyController, complete: bool) -> Result<SessionView, String> {
    study
        .session()
        .map(|session| SessionView::of(session, complete))
        .ok_or_else(|| FlashcardError::NoActiveSession.into())
}

// Card management commands
#[tauri::command]
pub async fn get_cards(state: State<'_, AppState>) -> Result<Vec<Card>, String> {
    Ok(state.store.get_cards().await?)
}

#[tauri::command]
pub async fn import_csv(state: State<'_, AppState>, text: String, mapping: Option<ColumnMapping>) -> Result<Vec<Card>, String> {
    let parsed = csv_import::parse(&text)?;
    let mapping = mapping.unwrap_or_else(|| ColumnMapping::default_for(&parsed.headers));
    let cards = csv_import::build_cards(&parsed, &mapping)?;
    Ok(state.store.add_cards(cards).await?)
}

#[tauri::command]
pub async fn get_review_stats(state: State<'_, AppState>) -> Result<ReviewStats, String> {
    Ok(state.store.get_review_stats(Utc::now()).await?)
}

#[tauri::command]
pub async fn get_categories(state: State<'_, AppState>) -> Result<Vec<String>, String> {
    Ok(state.store.get_categories().await?)
}

#[tauri::command]
pub async fn get_category_stats(state: State<'_, AppState>) -> Result<Vec<CategoryStats>, String> {
    Ok(state.store.get_category_stats(Utc::now()).await?)
}

#[tauri::command]
pub async fn count_matching(
    state: State<'_, AppState>,
    category: Option<String>,
    difficulty: DifficultyBucket,
) -> Result<usize, String> {
    Ok(state.store.count_matching(category.as_deref(), difficulty).await?)
}

#[tauri::command]
pub async fn bulk_update_category(state: State<'_, AppState>, request: BulkUpdateRequest) -> Result<(), String> {
    Ok(state.store.update_category(&request.card_ids, &request.category).await?)
}

#[tauri::command]
pub async fn delete_multiple_cards(state: State<'_, AppState>, card_ids: Vec<String>) -> Result<(), String> {
    Ok(state.store.delete_cards(&card_ids).await?)
}

#[tauri::command]
pub async fn clear_all(state: State<'_, AppState>) -> Result<(), String> {
    state.study.lock().await.exit(false).await?;
    Ok(state.local.service().clear_all()?)
}

#[tauri::command]
pub async fn sync_to_cloud(state: State<'_, AppState>) -> Result<usize, String> {
    let remote = state.remote.as_ref().ok_or(FlashcardError::NotSignedIn)?;
    Ok(sync_cards(state.local.as_ref(), remote.as_ref()).await?)
}

// Review session commands
#[tauri::command]
pub async fn start_review(
    state: State<'_, AppState>,
    filter: SessionFilter,
    resume: Option<bool>,
) -> Result<SessionView, String> {
    let mut study = state.study.lock().await;
    let session = study.start_review(filter, resume.unwrap_or(true)).await?;
    Ok(SessionView::of(session, false))
}

#[tauri::command]
pub async fn start_daily_review(
    state: State<'_, AppState>,
    categories: Vec<String>,
    count: Option<usize>,
) -> Result<SessionView, String> {
    let count = count.unwrap_or(state.settings.daily_review_count);
    let mut study = state.study.lock().await;
    let session = study.start_daily_review(&categories, count).await?;
    Ok(SessionView::of(session, false))
}

#[tauri::command]
pub async fn flip_card(state: State<'_, AppState>) -> Result<SessionView, String> {
    let mut study = state.study.lock().await;
    study.flip()?;
    current_view(&study, false)
}

#[tauri::command]
pub async fn next_card(state: State<'_, AppState>) -> Result<SessionView, String> {
    let mut study = state.study.lock().await;
    let advance = study.next()?;
    current_view(&study, advance == Advance::Complete)
}

#[tauri::command]
pub async fn previous_card(state: State<'_, AppState>) -> Result<SessionView, String> {
    let mut study = state.study.lock().await;
    study.previous()?;
    current_view(&study, false)
}

#[tauri::command]
pub async fn rate_card(state: State<'_, AppState>, rating: String) -> Result<SessionView, String> {
    let mut study = state.study.lock().await;
    let outcome = study.rate_named(&rating)?;
    current_view(&study, outcome.advance == Some(Advance::Complete))
}

#[tauri::command]
pub async fn exit_review(state: State<'_, AppState>, keep_progress: Option<bool>) -> Result<(), String> {
    let mut study = state.study.lock().await;
    study.exit(keep_progress.unwrap_or(true)).await?;
    Ok(())
}
