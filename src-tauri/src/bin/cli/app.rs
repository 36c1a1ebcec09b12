use std::sync::Arc;

use anyhow::{Context, Result};

use flashdeck_lib::card_service::CardService;
use flashdeck_lib::card_store::{CardStore, LocalCardStore};
use flashdeck_lib::config::{self, AppSettings, Backend};
use flashdeck_lib::progress::ProgressStore;
use flashdeck_lib::remote::RemoteCardStore;
use flashdeck_lib::storage::{KeyValueStore, Storage};

/// Shared application state for CLI commands
pub struct App {
    pub settings: AppSettings,
    pub local: Arc<LocalCardStore>,
    pub remote: Option<Arc<RemoteCardStore>>,
    pub progress: ProgressStore,
}

impl App {
    /// Open the data directory and pick the card store from settings and environment
    pub fn new() -> Result<Self> {
        let data_dir = config::data_dir().context("Failed to get data directory")?;
        let storage: Arc<dyn KeyValueStore> = Arc::new(
            Storage::new(&data_dir).with_context(|| format!("Failed to open {}", data_dir.display()))?,
        );
        let settings = AppSettings::load(storage.as_ref())?.with_env();

        let service = CardService::new(storage.clone()).context("Failed to load cards")?;
        let local = Arc::new(LocalCardStore::new(Arc::new(service)));
        let remote = match &settings.backend {
            Backend::Local => None,
            Backend::Remote(remote_config) => {
                let store = RemoteCardStore::new(remote_config.clone(), config::user_from_env())
                    .context("Failed to create remote client")?;
                Some(Arc::new(store))
            }
        };

        Ok(Self {
            settings,
            local,
            remote,
            progress: ProgressStore::new(storage),
        })
    }

    /// The store study sessions and card edits go through
    pub fn store(&self) -> Arc<dyn CardStore> {
        match &self.remote {
            Some(remote) => remote.clone() as Arc<dyn CardStore>,
            None => self.local.clone() as Arc<dyn CardStore>,
        }
    }

    pub fn service(&self) -> &CardService {
        self.local.service()
    }
}
