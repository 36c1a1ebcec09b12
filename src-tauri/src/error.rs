use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlashcardError {
    /// Rejected before any state was touched (bad CSV, bad column mapping, empty category).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No cards match the selected filters")]
    EmptySelection,

    #[error("Invalid rating: {0}")]
    InvalidRating(String),

    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("No study session is active")]
    NoActiveSession,

    #[error("User must be logged in")]
    NotSignedIn,

    #[error("Remote store error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<FlashcardError> for String {
    fn from(err: FlashcardError) -> Self {
        err.to_string()
    }
}

pub type Result<T> = std::result::Result<T, FlashcardError>;
