use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use studydeck_core::{CoreError, KeyValueStore};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub mod paths;

const FILE_VERSION: u32 = 1;
pub const DEFAULT_MAX_BACKUPS: usize = 10;

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileImage {
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    entries: BTreeMap<String, String>,
}

impl FileImage {
    fn new_empty() -> Self {
        let now = Utc::now();
        Self {
            version: FILE_VERSION,
            created_at: now,
            updated_at: now,
            entries: BTreeMap::new(),
        }
    }
}

/// Key-value medium kept in one JSON file.
///
/// The file is re-read before every operation, so handles in different
/// processes see each other's writes. Handles in the same process serialize
/// on a per-file lock, which makes compare-and-swap atomic among them.
pub struct JsonFileKv {
    path: PathBuf,
    backups_dir: PathBuf,
    max_backups: usize,
    lock: Arc<Mutex<()>>,
}

impl JsonFileKv {
    pub fn open_default() -> Result<Self, CoreError> {
        let (file, backups) = paths::default_store_file();
        Self::open_with(file, backups, DEFAULT_MAX_BACKUPS)
    }

    /// `max_backups == 0` disables backups.
    pub fn open_with(path: PathBuf, backups_dir: PathBuf, max_backups: usize) -> Result<Self, CoreError> {
        ensure_parent_dirs(&path)?;
        if max_backups > 0 {
            fs::create_dir_all(&backups_dir).map_err(io_err)?;
        }
        let lock = file_lock(&path)?;
        let kv = Self {
            path,
            backups_dir,
            max_backups,
            lock,
        };
        {
            let _g = kv.lock.lock();
            if !kv.path.exists() {
                kv.write_image(&mut FileImage::new_empty())?;
            } else {
                // Fail early on a file that is not a medium image.
                kv.read_image()?;
            }
        }
        Ok(kv)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_image(&self) -> Result<FileImage, CoreError> {
        let buf = match fs::read_to_string(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FileImage::new_empty()),
            Err(e) => return Err(io_err(e)),
        };
        let img: FileImage = serde_json::from_str(&buf)
            .map_err(|e| CoreError::Storage(format!("{} is not a store file: {e}", self.path.display())))?;
        if img.version > FILE_VERSION {
            return Err(CoreError::Storage(format!(
                "{} has unsupported version {}",
                self.path.display(),
                img.version
            )));
        }
        Ok(img)
    }

    fn write_image(&self, img: &mut FileImage) -> Result<(), CoreError> {
        img.version = FILE_VERSION;
        img.updated_at = Utc::now();
        let json = serde_json::to_vec_pretty(img)?;
        write_atomic(&self.path, &json).map_err(io_err)?;
        if self.max_backups > 0 {
            // The new image is already in place; a missing backup must not fail the write.
            if let Err(e) = write_backup(&self.backups_dir, self.max_backups, &json) {
                warn!(dir = %self.backups_dir.display(), error = %e, "backup not written");
            }
        }
        debug!(path = %self.path.display(), keys = img.entries.len(), "wrote store file");
        Ok(())
    }

    /// Run `f` on a fresh image under the lock; write back only if it reports a change.
    fn update<R>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> (bool, R)) -> Result<R, CoreError> {
        let _g = self.lock.lock();
        let mut img = self.read_image()?;
        let (changed, out) = f(&mut img.entries);
        if changed {
            self.write_image(&mut img)?;
        }
        Ok(out)
    }
}

impl KeyValueStore for JsonFileKv {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let _g = self.lock.lock();
        Ok(self.read_image()?.entries.remove(key))
    }

    fn set(&self, key: &str, value: String) -> Result<(), CoreError> {
        self.update(|m| {
            let changed = m.get(key) != Some(&value);
            m.insert(key.to_string(), value);
            (changed, ())
        })
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.update(|m| (m.remove(key).is_some(), ()))
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<String>,
    ) -> Result<bool, CoreError> {
        self.update(|m| {
            if m.get(key).map(String::as_str) != expected {
                return (false, false);
            }
            match new {
                Some(v) => {
                    m.insert(key.to_string(), v);
                }
                None => {
                    m.remove(key);
                }
            }
            (true, true)
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        let _g = self.lock.lock();
        Ok(self
            .read_image()?
            .entries
            .into_keys()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

fn io_err(e: io::Error) -> CoreError {
    CoreError::Storage(e.to_string())
}

fn ensure_parent_dirs(path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    Ok(())
}

/// One lock per store file for the whole process.
fn file_lock(path: &Path) -> Result<Arc<Mutex<()>>, CoreError> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.canonicalize().map_err(io_err)?,
        _ => std::env::current_dir().map_err(io_err)?,
    };
    let name = path
        .file_name()
        .ok_or(CoreError::Invalid("store path has no file name"))?;
    let key = dir.join(name);
    let mut locks = LOCKS.get_or_init(Default::default).lock();
    Ok(locks.entry(key).or_default().clone())
}

fn write_atomic(path: &Path, json: &[u8]) -> Result<(), io::Error> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(json)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn write_backup(backups_dir: &Path, max_backups: usize, json: &[u8]) -> Result<(), io::Error> {
    fs::create_dir_all(backups_dir)?;
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
    let backup_path = backups_dir.join(format!("studydeck-{ts}.json"));
    let mut btmp = NamedTempFile::new_in(backups_dir)?;
    btmp.write_all(json)?;
    btmp.flush()?;
    btmp.persist(&backup_path).map_err(|e| e.error)?;

    rotate_backups(backups_dir, max_backups)
}

fn rotate_backups(dir: &Path, keep: usize) -> Result<(), io::Error> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    // Names embed the timestamp, so lexical order is age order.
    entries.sort_by_key(|e| e.file_name());
    if entries.len() > keep {
        for e in &entries[0..entries.len() - keep] {
            let _ = fs::remove_file(e.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use studydeck_core::{DeckStore, Flashcard};
    use tempfile::tempdir;

    fn open(dir: &Path, keep: usize) -> JsonFileKv {
        let (file, backups) = paths::store_files_in(dir);
        JsonFileKv::open_with(file, backups, keep).unwrap()
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let kv = open(dir.path(), 2);
            kv.set("a", "1".into()).unwrap();
            kv.set("b", "2".into()).unwrap();
            kv.remove("a").unwrap();
        }
        let kv = open(dir.path(), 2);
        assert_eq!(kv.get("a").unwrap(), None);
        assert_eq!(kv.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn handles_on_same_file_share_state() {
        let dir = tempdir().unwrap();
        let one = open(dir.path(), 0);
        let two = open(dir.path(), 0);

        one.set("k", "v1".into()).unwrap();
        assert!(!two.compare_and_swap("k", None, Some("x".into())).unwrap());
        assert!(two.compare_and_swap("k", Some("v1"), Some("v2".into())).unwrap());
        assert_eq!(one.get("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn backups_are_rotated() {
        let dir = tempdir().unwrap();
        let kv = open(dir.path(), 3);
        for i in 0..8 {
            kv.set("k", i.to_string()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let n = fs::read_dir(dir.path().join("backups")).unwrap().count();
        assert!(n <= 3, "kept {n} backups");
        assert!(n >= 1);
    }

    #[test]
    fn unwritable_backups_do_not_fail_writes() {
        let dir = tempdir().unwrap();
        let kv = open(dir.path(), 2);
        let backups = dir.path().join("backups");
        fs::remove_dir_all(&backups).unwrap();
        fs::write(&backups, "in the way").unwrap();

        kv.set("k", "v".into()).unwrap();
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(open_again(dir.path()).get("k").unwrap().as_deref(), Some("v"));
    }

    fn open_again(dir: &Path) -> JsonFileKv {
        let (file, _) = paths::store_files_in(dir);
        JsonFileKv::open_with(file, dir.join("other-backups"), 0).unwrap()
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("notes.json");
        fs::write(&file, "[1, 2, 3]").unwrap();
        let err = JsonFileKv::open_with(file, dir.path().join("b"), 0).err().unwrap();
        assert!(matches!(err, CoreError::Storage(_)));
    }

    #[test]
    fn prefix_scan_reads_from_disk() {
        let dir = tempdir().unwrap();
        let kv = open(dir.path(), 0);
        kv.set("flashcards-cards-1", "[]".into()).unwrap();
        kv.set("flashcards-decks", "[]".into()).unwrap();
        assert_eq!(kv.keys_with_prefix("flashcards-cards-").unwrap(), vec!["flashcards-cards-1"]);
    }

    #[test]
    fn deck_store_over_file_medium() {
        let dir = tempdir().unwrap();
        let id = {
            let store = DeckStore::new(Arc::new(open(dir.path(), 1)));
            let id = store.create_deck("Biology 101").unwrap();
            let now = chrono::Utc::now();
            let cards = vec![
                Flashcard::new("c1", id.clone(), "Q1", "A1", now),
                Flashcard::new("c2", id.clone(), "Q2", "A2", now),
            ];
            store.save_cards(&id, &cards).unwrap();
            id
        };

        let store = DeckStore::new(Arc::new(open(dir.path(), 1)));
        assert_eq!(store.get_deck(&id).unwrap().card_count, 2);
        assert_eq!(store.list_cards(&id).len(), 2);

        store.delete_deck(&id).unwrap();
        assert!(store.get_deck(&id).is_none());
        assert!(store.list_cards(&id).is_empty());
    }
}
