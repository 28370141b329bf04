use crate::config::ControllerConfig;
use crate::error::ControlError;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const CACHE_STORE: &str = "menu_update_times.json";
const CHATS_DIR: &str = "chats";
const LOCK_FILE: &str = ".lock";

/// On-disk layout of one automated profile: `<root>/<controller>/<profile>/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfilePaths {
    root: PathBuf,
}

impl ProfilePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(cfg: &ControllerConfig) -> Self {
        Self::new(
            cfg.screens_root
                .join(file_component(&cfg.controller_name))
                .join(file_component(&cfg.profile_name)),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot(&self, menu: &str) -> PathBuf {
        self.root.join(format!("{}.xml", file_component(menu)))
    }

    pub fn cache_store(&self) -> PathBuf {
        self.root.join(CACHE_STORE)
    }

    pub fn chats_dir(&self) -> PathBuf {
        self.root.join(CHATS_DIR)
    }

    pub fn chat_history(&self, peer: &str) -> PathBuf {
        self.chats_dir().join(format!("{}.json", file_component(peer)))
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }
}

/// Maps a caller-chosen name onto a single path component. Separators and
/// `%` are percent-escaped, so distinct names never share a file.
pub(crate) fn file_component(name: &str) -> String {
    match name {
        "" => return "%".into(),
        "." => return "%2E".into(),
        ".." => return "%2E%2E".into(),
        _ => {}
    }
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            '\0' => out.push_str("%00"),
            c => out.push(c),
        }
    }
    out
}

/// Exclusive advisory lock on a profile directory, held for the lifetime of a
/// controller. A second controller on the same profile fails to acquire it.
#[derive(Debug)]
pub struct ProfileLock {
    _file: File,
    path: PathBuf,
}

impl ProfileLock {
    pub fn acquire(paths: &ProfilePaths) -> Result<Self, ControlError> {
        fs::create_dir_all(paths.root())
            .map_err(|e| ControlError::Store(format!("create {}: {}", paths.root().display(), e)))?;
        let path = paths.lock_file();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ControlError::Store(format!("open {}: {}", path.display(), e)))?;
        file.try_lock_exclusive()
            .map_err(|_| ControlError::ProfileLocked(paths.root().to_path_buf()))?;
        debug!(lock = %path.display(), "profile lock acquired");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Serializes `value` as JSON next to `path` and renames it into place, so
/// readers never observe a half-written store.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ControlError> {
    let io_err = |what: &str, e: std::io::Error| ControlError::Store(format!("{} {}: {}", what, path.display(), e));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("create dir for", e))?;
    }
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| ControlError::Store(format!("serialize {}: {}", path.display(), e)))?;

    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(|e| io_err("create temp for", e))?;
    file.write_all(&data).map_err(|e| io_err("write temp for", e))?;
    file.sync_all().map_err(|e| io_err("sync temp for", e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| io_err("rename temp onto", e))?;
    Ok(())
}
