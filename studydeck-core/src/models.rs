use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DeckId = String;
pub type CardId = String;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: DeckId,
    pub title: String,
    pub card_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deck {
    /// An empty deck stamped with `now` for both timestamps.
    pub fn new(id: impl Into<DeckId>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            card_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: CardId,
    pub deck_id: DeckId,
    pub front: String,
    pub back: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flashcard {
    pub fn new(
        id: impl Into<CardId>,
        deck_id: impl Into<DeckId>,
        front: impl Into<String>,
        back: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            deck_id: deck_id.into(),
            front: front.into(),
            back: back.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the text of either side, refreshing `updated_at` when anything changed.
    pub fn edit(&mut self, front: Option<String>, back: Option<String>, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if let Some(f) = front {
            if f != self.front {
                self.front = f;
                changed = true;
            }
        }
        if let Some(b) = back {
            if b != self.back {
                self.back = b;
                changed = true;
            }
        }
        if changed {
            self.updated_at = now;
        }
        changed
    }
}

/// Card text before the store has assigned identity and timestamps.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewCard {
    pub front: String,
    pub back: String,
}

impl NewCard {
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deck_serializes_with_camel_case_fields() {
        let now = Utc::now();
        let deck = Deck::new("d1", "Biology 101", now);
        let v = serde_json::to_value(&deck).unwrap();
        assert_eq!(v["title"], "Biology 101");
        assert_eq!(v["cardCount"], 0);
        assert!(v.get("createdAt").is_some());
        assert!(v.get("updatedAt").is_some());
        assert!(v.get("card_count").is_none());
    }

    #[test]
    fn edit_only_touches_timestamp_on_change() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        let mut c = Flashcard::new("c1", "d1", "Q", "A", t0);

        assert!(!c.edit(Some("Q".into()), None, t1));
        assert_eq!(c.updated_at, t0);

        assert!(c.edit(None, Some("A2".into()), t1));
        assert_eq!(c.back, "A2");
        assert_eq!(c.updated_at, t1);
        assert_eq!(c.created_at, t0);
    }
}
