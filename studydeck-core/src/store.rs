use crate::codec::{decode, encode, Load};
use crate::config::{cards_key, StoreConfig, CARDS_KEY_PREFIX, DECKS_KEY};
use crate::kv::KeyValueStore;
use crate::notify::{Change, ChangeHub, ContextId, StoreEvent, Subscription};
use crate::source::{Clock, IdSource, SystemClock, UuidIds};
use crate::{CoreError, Deck, DeckId, Flashcard, NewCard};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Corrupt blobs are copied here before being overwritten.
const QUARANTINE_PREFIX: &str = "corrupt:";

/// Sole reader and writer of deck and card state on a key-value medium.
///
/// Every handle is one execution context. Handles created with [`DeckStore::attach`]
/// share the medium and the notification hub with the handle they came from.
pub struct DeckStore {
    kv: Arc<dyn KeyValueStore>,
    ids: Arc<dyn IdSource>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    hub: ChangeHub,
    context: ContextId,
}

/// Something `check` found wrong with the stored data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Finding {
    CorruptBlob { key: String, reason: String },
    OrphanCards { deck_id: DeckId, count: usize },
    CountMismatch { deck_id: DeckId, recorded: usize, actual: usize },
    Quarantined { key: String },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::CorruptBlob { key, reason } => write!(f, "corrupt blob at {key}: {reason}"),
            Finding::OrphanCards { deck_id, count } => {
                write!(f, "{count} card(s) stored for missing deck {deck_id}")
            }
            Finding::CountMismatch {
                deck_id,
                recorded,
                actual,
            } => write!(f, "deck {deck_id} records {recorded} card(s) but stores {actual}"),
            Finding::Quarantined { key } => write!(f, "quarantined copy kept at {key}"),
        }
    }
}

impl DeckStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_parts(kv, Arc::new(UuidIds), Arc::new(SystemClock), StoreConfig::default())
    }

    pub fn with_parts(
        kv: Arc<dyn KeyValueStore>,
        ids: Arc<dyn IdSource>,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
    ) -> Self {
        let hub = ChangeHub::new();
        let context = hub.new_context();
        Self {
            kv,
            ids,
            clock,
            config,
            hub,
            context,
        }
    }

    /// Another context over the same medium; it sees this context's notifications and vice versa.
    pub fn attach(&self) -> Self {
        Self {
            kv: self.kv.clone(),
            ids: self.ids.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
            hub: self.hub.clone(),
            context: self.hub.new_context(),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Next identifier from this store's id source.
    pub fn next_id(&self) -> String {
        self.ids.next_id()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A card for `deck_id` stamped from this store's id source and clock. Nothing is written.
    pub fn new_card(&self, deck_id: &str, draft: &NewCard) -> Flashcard {
        Flashcard::new(self.next_id(), deck_id, draft.front.clone(), draft.back.clone(), self.now())
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.hub.subscribe(callback)
    }

    // ----- reads -----

    pub fn load_decks(&self) -> Result<Load<Vec<Deck>>, CoreError> {
        self.load(DECKS_KEY)
    }

    pub fn load_cards(&self, deck_id: &str) -> Result<Load<Vec<Flashcard>>, CoreError> {
        self.load(&cards_key(deck_id))
    }

    /// Stored order. Missing, unreadable or corrupt data all read as no decks.
    pub fn list_decks(&self) -> Vec<Deck> {
        absorb(DECKS_KEY, self.load_decks())
    }

    pub fn get_deck(&self, id: &str) -> Option<Deck> {
        self.list_decks().into_iter().find(|d| d.id == id)
    }

    pub fn list_cards(&self, deck_id: &str) -> Vec<Flashcard> {
        absorb(&cards_key(deck_id), self.load_cards(deck_id))
    }

    // ----- deck writes -----

    pub fn create_deck(&self, title: &str) -> Result<DeckId, CoreError> {
        let deck = Deck::new(self.ids.next_id(), title, self.clock.now());
        let id = deck.id.clone();
        self.insert_new_deck(deck)?;
        debug!(deck = %id, "created deck");
        self.emit(Change::DeckCreated(id.clone()));
        Ok(id)
    }

    /// Create a deck together with its cards so the count is right from the first write.
    pub fn create_deck_with_cards(&self, title: &str, drafts: &[NewCard]) -> Result<DeckId, CoreError> {
        let mut deck = Deck::new(self.ids.next_id(), title, self.clock.now());
        let cards: Vec<Flashcard> = drafts.iter().map(|d| self.new_card(&deck.id, d)).collect();

        // Cards land first so nobody sees the deck without them.
        self.mutate::<Flashcard, ()>(&cards_key(&deck.id), |stored| {
            *stored = cards.clone();
            Ok(Some(()))
        })?;
        deck.card_count = cards.len();
        let id = deck.id.clone();
        self.insert_new_deck(deck)?;
        debug!(deck = %id, cards = cards.len(), "created deck with cards");
        self.emit(Change::DeckCreated(id.clone()));
        Ok(id)
    }

    /// Upsert by id. `updated_at` is the caller's; `card_count` always reflects stored cards.
    pub fn save_deck(&self, deck: &Deck) -> Result<(), CoreError> {
        self.mutate_decks(|decks| {
            let mut deck = deck.clone();
            deck.card_count = self.stored_card_count(&deck.id)?;
            match decks.iter_mut().find(|d| d.id == deck.id) {
                Some(slot) => *slot = deck,
                None => decks.push(deck),
            }
            Ok(Some(()))
        })?;
        debug!(deck = %deck.id, "saved deck");
        self.emit(Change::DeckSaved(deck.id.clone()));
        Ok(())
    }

    /// Removes the deck and its card collection. Unknown ids are a no-op.
    pub fn delete_deck(&self, id: &str) -> Result<(), CoreError> {
        let removed = self
            .mutate_decks(|decks| {
                let before = decks.len();
                decks.retain(|d| d.id != id);
                Ok((decks.len() != before).then_some(()))
            })?
            .is_some();

        let key = cards_key(id);
        let cleanup = self.kv.get(&key).and_then(|v| match v {
            Some(_) => self.kv.remove(&key).map(|()| true),
            None => Ok(false),
        });
        let had_cards = match cleanup {
            Ok(had) => had,
            Err(e) => {
                // The deck record is already gone; observers must still hear about it.
                if removed {
                    warn!(deck = %id, error = %e, "deck removed but its cards were left behind");
                    self.emit(Change::DeckDeleted(id.to_string()));
                }
                return Err(e);
            }
        };
        if had_cards && !removed {
            debug!(deck = %id, "removed orphaned card collection");
        }

        if removed || had_cards {
            debug!(deck = %id, "deleted deck");
            self.emit(Change::DeckDeleted(id.to_string()));
        }
        Ok(())
    }

    // ----- card writes -----

    /// Replace the whole card collection of a deck and bring its count up to date.
    pub fn save_cards(&self, deck_id: &str, cards: &[Flashcard]) -> Result<(), CoreError> {
        if cards.iter().any(|c| c.deck_id != deck_id) {
            return Err(CoreError::Invalid("card belongs to another deck"));
        }
        if self.config.require_deck && self.get_deck(deck_id).is_none() {
            return Err(CoreError::NotFound("deck"));
        }

        self.mutate::<Flashcard, ()>(&cards_key(deck_id), |stored| {
            *stored = cards.to_vec();
            Ok(Some(()))
        })?;

        let now = self.clock.now();
        let updated = self.mutate_decks(|decks| {
            let Some(deck) = decks.iter_mut().find(|d| d.id == deck_id) else {
                return Ok(None);
            };
            // Re-read so a concurrent card write from another context wins consistently.
            deck.card_count = self.stored_card_count(deck_id)?;
            deck.updated_at = now;
            Ok(Some(()))
        });

        // The cards are committed either way, so observers hear about them either way.
        self.emit(Change::CardsSaved {
            deck_id: deck_id.to_string(),
            count: cards.len(),
        });

        match updated {
            Ok(Some(())) => {}
            Ok(None) => warn!(deck = %deck_id, "cards saved for a deck that does not exist"),
            Err(e) => {
                warn!(deck = %deck_id, error = %e, "cards saved but deck count not updated");
                return Err(CoreError::CountStale {
                    deck_id: deck_id.to_string(),
                    source: Box::new(e),
                });
            }
        }
        debug!(deck = %deck_id, cards = cards.len(), "saved cards");
        Ok(())
    }

    // ----- maintenance -----

    pub fn check(&self) -> Result<Vec<Finding>, CoreError> {
        let mut findings = Vec::new();

        let decks = match self.load_decks()? {
            Load::Found { value, .. } => value,
            Load::Corrupt { reason, .. } => {
                findings.push(Finding::CorruptBlob {
                    key: DECKS_KEY.to_string(),
                    reason,
                });
                Vec::new()
            }
            Load::Absent => Vec::new(),
        };

        for deck in &decks {
            let actual = match self.load_cards(&deck.id)? {
                Load::Found { value, .. } => value.len(),
                Load::Corrupt { reason, .. } => {
                    findings.push(Finding::CorruptBlob {
                        key: cards_key(&deck.id),
                        reason,
                    });
                    0
                }
                Load::Absent => 0,
            };
            if actual != deck.card_count {
                findings.push(Finding::CountMismatch {
                    deck_id: deck.id.clone(),
                    recorded: deck.card_count,
                    actual,
                });
            }
        }

        for key in self.kv.keys_with_prefix(CARDS_KEY_PREFIX)? {
            let deck_id = &key[CARDS_KEY_PREFIX.len()..];
            if decks.iter().any(|d| d.id == deck_id) {
                continue;
            }
            match self.load_cards(deck_id)? {
                Load::Found { value, .. } => findings.push(Finding::OrphanCards {
                    deck_id: deck_id.to_string(),
                    count: value.len(),
                }),
                Load::Corrupt { reason, .. } => findings.push(Finding::CorruptBlob {
                    key: key.clone(),
                    reason,
                }),
                Load::Absent => {}
            }
        }

        for key in self.kv.keys_with_prefix(QUARANTINE_PREFIX)? {
            findings.push(Finding::Quarantined { key });
        }

        Ok(findings)
    }

    /// Rewrite every deck whose recorded count disagrees with its stored cards.
    pub fn repair_counts(&self) -> Result<usize, CoreError> {
        let now = self.clock.now();
        let fixed = self
            .mutate_decks(|decks| {
                let mut n = 0usize;
                for deck in decks.iter_mut() {
                    let actual = self.stored_card_count(&deck.id)?;
                    if actual != deck.card_count {
                        deck.card_count = actual;
                        deck.updated_at = now;
                        n += 1;
                    }
                }
                Ok((n > 0).then_some(n))
            })?
            .unwrap_or(0);
        if fixed > 0 {
            debug!(decks = fixed, "repaired card counts");
            self.emit(Change::CountsRepaired(fixed));
        }
        Ok(fixed)
    }

    // ----- internals -----

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Load<Vec<T>>, CoreError> {
        let load = decode(self.kv.get(key)?);
        if let Load::Corrupt { reason, .. } = &load {
            warn!(key, %reason, "stored collection is corrupt");
        }
        Ok(load)
    }

    fn stored_card_count(&self, deck_id: &str) -> Result<usize, CoreError> {
        Ok(self.load_cards(deck_id)?.unwrap_or_empty().len())
    }

    fn insert_new_deck(&self, deck: Deck) -> Result<(), CoreError> {
        self.mutate_decks(|decks| {
            if decks.iter().any(|d| d.id == deck.id) {
                return Err(CoreError::Conflict("deck id already in use"));
            }
            decks.push(deck.clone());
            Ok(Some(()))
        })?;
        Ok(())
    }

    fn mutate_decks<R>(
        &self,
        f: impl FnMut(&mut Vec<Deck>) -> Result<Option<R>, CoreError>,
    ) -> Result<Option<R>, CoreError> {
        self.mutate(DECKS_KEY, f)
    }

    /// Optimistic read-modify-write of one collection.
    ///
    /// `f` runs against a fresh read on every attempt; returning `Ok(None)` means
    /// nothing changed and skips the write.
    fn mutate<T, R>(
        &self,
        key: &str,
        mut f: impl FnMut(&mut Vec<T>) -> Result<Option<R>, CoreError>,
    ) -> Result<Option<R>, CoreError>
    where
        T: Serialize + DeserializeOwned,
    {
        for attempt in 0..self.config.max_retries.max(1) {
            let raw = self.kv.get(key)?;
            let (mut items, revision) = match decode::<T>(raw.clone()) {
                Load::Found { value, revision } => (value, revision),
                Load::Absent => (Vec::new(), 0),
                Load::Corrupt { raw, reason } => {
                    warn!(key, %reason, "overwriting corrupt collection; keeping a copy");
                    self.kv.set(&format!("{QUARANTINE_PREFIX}{key}"), raw)?;
                    (Vec::new(), 0)
                }
            };

            let Some(out) = f(&mut items)? else {
                return Ok(None);
            };

            let blob = encode(&items, revision + 1)?;
            if self.kv.compare_and_swap(key, raw.as_deref(), Some(blob))? {
                return Ok(Some(out));
            }
            debug!(key, attempt, "collection changed underneath us; retrying");
        }
        Err(CoreError::Conflict("collection kept changing during write"))
    }

    fn emit(&self, change: Change) {
        self.hub.emit(StoreEvent {
            origin: self.context,
            change,
        });
    }
}

fn absorb<T>(key: &str, load: Result<Load<Vec<T>>, CoreError>) -> Vec<T> {
    match load {
        Ok(l) => l.unwrap_or_empty(),
        Err(e) => {
            warn!(key, error = %e, "read failed; treating as empty");
            Vec::new()
        }
    }
}
