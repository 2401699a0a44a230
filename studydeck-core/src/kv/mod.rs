use crate::CoreError;

pub mod memory;

/// A string-keyed, string-valued persistence medium.
///
/// Values are opaque to the medium; the store layers its own encoding on top.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
    fn set(&self, key: &str, value: String) -> Result<(), CoreError>;
    fn remove(&self, key: &str) -> Result<(), CoreError>;

    /// Write `new` (or remove the key when `None`) only if the current value equals `expected`.
    /// Returns `false` without writing when someone else got there first.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<String>,
    ) -> Result<bool, CoreError>;

    /// Keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoreError>;
}
