use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub fn data_root() -> PathBuf {
    if let Some(pd) = ProjectDirs::from("com", "studydeck", "StudyDeck") {
        pd.data_dir().to_path_buf()
    } else {
        // Fallback: current dir
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}

/// Medium file and backups directory under `root`.
pub fn store_files_in(root: &Path) -> (PathBuf, PathBuf) {
    (root.join("studydeck.json"), root.join("backups"))
}

pub fn default_store_file() -> (PathBuf, PathBuf) {
    store_files_in(&data_root())
}
