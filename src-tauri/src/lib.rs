pub mod card_service;
pub mod card_store;
pub mod config;
pub mod csv_import;
pub mod error;
pub mod models;
pub mod progress;
pub mod remote;
pub mod session;
pub mod spaced_repetition;
pub mod storage;
pub mod study;

#[cfg(feature = "desktop")]
mod commands;

pub use error::{FlashcardError, Result};

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use std::sync::Arc;

    use tauri::{Emitter, Manager};

    use crate::card_service::CardService;
    use crate::card_store::{CardStore, LocalCardStore};
    use crate::commands::AppState;
    use crate::config::{AppSettings, Backend};
    use crate::progress::ProgressStore;
    use crate::remote::RemoteCardStore;
    use crate::storage::{KeyValueStore, Storage};
    use crate::study::StudyController;

    tauri::Builder::default()
        .invoke_handler(tauri::generate_handler![
            commands::get_cards,
            commands::import_csv,
            commands::get_review_stats,
            commands::get_categories,
            commands::get_category_stats,
            commands::count_matching,
            commands::bulk_update_category,
            commands::delete_multiple_cards,
            commands::clear_all,
            commands::sync_to_cloud,
            commands::start_review,
            commands::start_daily_review,
            commands::flip_card,
            commands::next_card,
            commands::previous_card,
            commands::rate_card,
            commands::exit_review,
        ])
        .setup(|app| {
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .build(),
                )?;
            }

            let storage: Arc<dyn KeyValueStore> = Arc::new(Storage::new(config::data_dir()?)?);
            let settings = AppSettings::load(storage.as_ref())?.with_env();
            let service = Arc::new(CardService::new(storage.clone())?);
            let local = Arc::new(LocalCardStore::new(service.clone()));
            let remote = match &settings.backend {
                Backend::Local => None,
                Backend::Remote(remote_config) => Some(Arc::new(RemoteCardStore::new(
                    remote_config.clone(),
                    config::user_from_env(),
                )?)),
            };
            let store: Arc<dyn CardStore> = match &remote {
                Some(remote) => remote.clone() as Arc<dyn CardStore>,
                None => local.clone() as Arc<dyn CardStore>,
            };

            let progress = ProgressStore::new(storage);
            let (controller, mut failures) =
                tauri::async_runtime::block_on(async { StudyController::new(store.clone(), progress) })?;

            let handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                while let Some(failure) = failures.recv().await {
                    if let Err(e) = handle.emit("sync-failure", &failure) {
                        log::warn!("Failed to report sync failure: {}", e);
                    }
                }
            });

            app.manage(AppState::new(settings, local, remote, store, controller));
            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
