use std::path::PathBuf;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::remote::{RemoteConfig, RemoteUser};
use crate::storage::{load_json, save_json, KeyValueStore, Storage, SETTINGS_KEY};

pub const ENV_DATA_DIR: &str = "FLASHDECK_DATA_DIR";
pub const ENV_SUPABASE_URL: &str = "FLASHDECK_SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "FLASHDECK_SUPABASE_ANON_KEY";
pub const ENV_ACCESS_TOKEN: &str = "FLASHDECK_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "FLASHDECK_USER_ID";

/// Where cards live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Local,
    Remote(RemoteConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub backend: Backend,
    /// Cards drawn for a daily review.
    pub daily_review_count: usize,
    /// Cards fetched for a due-review session.
    pub due_limit: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            backend: Backend::Local,
            daily_review_count: 10,
            due_limit: 20,
        }
    }
}

impl AppSettings {
    /// Stored settings, or defaults when none are stored or they are unreadable.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        Ok(load_json(store, SETTINGS_KEY)?.unwrap_or_default())
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        save_json(store, SETTINGS_KEY, self)
    }

    /// Switch to the remote backend when both the URL and anon key are provided.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let (Some(url), Some(anon_key)) = (lookup(ENV_SUPABASE_URL), lookup(ENV_SUPABASE_ANON_KEY)) {
            info!("Using remote card store at {}", url);
            self.backend = Backend::Remote(RemoteConfig { url, anon_key });
        }
        self
    }

    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }
}

/// The signed-in user, if credentials are provided.
pub fn user_from<F>(lookup: F) -> Option<RemoteUser>
where
    F: Fn(&str) -> Option<String>,
{
    match (lookup(ENV_USER_ID), lookup(ENV_ACCESS_TOKEN)) {
        (Some(id), Some(access_token)) => Some(RemoteUser { id, access_token }),
        _ => None,
    }
}

pub fn user_from_env() -> Option<RemoteUser> {
    user_from(|key| std::env::var(key).ok())
}

/// `FLASHDECK_DATA_DIR`, falling back to the platform data directory.
pub fn data_dir() -> Result<PathBuf> {
    match std::env::var_os(ENV_DATA_DIR) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => Storage::default_data_dir(),
    }
}
