pub const DECKS_KEY: &str = "flashcards-decks";
pub const CARDS_KEY_PREFIX: &str = "flashcards-cards-";

pub fn cards_key(deck_id: &str) -> String {
    format!("{CARDS_KEY_PREFIX}{deck_id}")
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Compare-and-swap attempts per mutation before giving up with a conflict.
    pub max_retries: usize,
    /// Reject card writes for decks that do not exist.
    pub require_deck: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            require_deck: false,
        }
    }
}

impl StoreConfig {
    pub fn strict() -> Self {
        Self {
            require_deck: true,
            ..Self::default()
        }
    }
}
