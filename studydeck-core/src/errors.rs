use crate::DeckId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("encode error: {0}")]
    Encode(String),
    /// The card collection was written but the deck's count could not be brought in line.
    #[error("cards saved but card count of deck {deck_id} is stale: {source}")]
    CountStale {
        deck_id: DeckId,
        source: Box<CoreError>,
    },
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Encode(e.to_string())
    }
}
