//! Blob encoding for stored collections.
//!
//! Every collection is written as `{"version": 1, "revision": n, "items": [...]}`.
//! A bare JSON array is the unversioned legacy shape and reads back as revision 0.

use crate::CoreError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const BLOB_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    revision: u64,
    items: &'a [T],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredBlob<T> {
    Versioned {
        version: u32,
        revision: u64,
        items: Vec<T>,
    },
    Legacy(Vec<T>),
}

/// Outcome of reading one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Load<T> {
    Found { value: T, revision: u64 },
    Corrupt { raw: String, reason: String },
    Absent,
}

impl<T> Load<T> {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Load::Corrupt { .. })
    }

    pub fn revision(&self) -> u64 {
        match self {
            Load::Found { revision, .. } => *revision,
            _ => 0,
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            Load::Found { value, .. } => Some(value),
            _ => None,
        }
    }
}

impl<T: Default> Load<T> {
    /// Corrupt and absent both collapse to the empty value.
    pub fn unwrap_or_empty(self) -> T {
        self.found().unwrap_or_default()
    }
}

pub fn encode<T: Serialize>(items: &[T], revision: u64) -> Result<String, CoreError> {
    let env = EnvelopeRef {
        version: BLOB_VERSION,
        revision,
        items,
    };
    Ok(serde_json::to_string(&env)?)
}

pub fn decode<T: DeserializeOwned>(raw: Option<String>) -> Load<Vec<T>> {
    let Some(raw) = raw else {
        return Load::Absent;
    };
    match serde_json::from_str::<StoredBlob<T>>(&raw) {
        Ok(StoredBlob::Versioned {
            version,
            revision,
            items,
        }) => {
            if version > BLOB_VERSION {
                Load::Corrupt {
                    raw,
                    reason: format!("unsupported blob version {version}"),
                }
            } else {
                Load::Found {
                    value: items,
                    revision,
                }
            }
        }
        Ok(StoredBlob::Legacy(items)) => Load::Found {
            value: items,
            revision: 0,
        },
        Err(e) => Load::Corrupt {
            raw,
            reason: e.to_string(),
        },
    }
}
