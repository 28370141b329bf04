use crate::bridge::Bridge;
use crate::error::ControlError;
use crate::profile::{write_json_atomic, ProfilePaths};
use crate::tree::flatten;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs as async_fs;
use tracing::{debug, info, warn};

// ========================= Clock =========================

/// Source of "now" in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self { bits: AtomicU64::new(start.to_bits()) }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

// ========================= Records =========================

/// Freshness of one menu's snapshot. Persisted as `{"start": secs, "ttl": secs}`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MenuState {
    pub start: f64,
    pub ttl: u64,
}

impl MenuState {
    /// Strictly older than `ttl`; a state exactly `ttl` seconds old is still fresh.
    pub fn is_expired_at(&self, now: f64) -> bool {
        now - self.start > self.ttl as f64
    }
}

pub type CacheRecord = BTreeMap<String, MenuState>;

// ========================= Snapshot cache =========================

/// Per-menu snapshot files plus the TTL record deciding when to re-capture.
pub struct SnapshotCache {
    paths: ProfilePaths,
    record: CacheRecord,
    clock: Arc<dyn Clock>,
}

impl SnapshotCache {
    /// Loads the record from the profile's store. A missing or unreadable
    /// store is replaced by an empty record, which is written back immediately.
    pub fn load(paths: ProfilePaths, clock: Arc<dyn Clock>) -> Result<Self, ControlError> {
        let store = paths.cache_store();
        let loaded = match std::fs::read(&store) {
            Ok(bytes) => match serde_json::from_slice::<CacheRecord>(&bytes) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(store = %store.display(), error = %e, "cache store corrupt, reinitializing");
                    None
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(store = %store.display(), "no cache store, starting empty");
                None
            }
            Err(e) => {
                warn!(store = %store.display(), error = %e, "cache store unreadable, reinitializing");
                None
            }
        };

        let record = match loaded {
            Some(record) => record,
            None => {
                let empty = CacheRecord::new();
                write_json_atomic(&store, &empty)?;
                empty
            }
        };
        debug!(menus = record.len(), "cache record loaded");
        Ok(Self { paths, record, clock })
    }

    pub fn snapshot_path(&self, menu: &str) -> PathBuf {
        self.paths.snapshot(menu)
    }

    pub fn state(&self, menu: &str) -> Option<&MenuState> {
        self.record.get(menu)
    }

    pub fn record(&self) -> &CacheRecord {
        &self.record
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn is_expired(&self, menu: &str) -> bool {
        if !self.snapshot_path(menu).exists() {
            return true;
        }
        match self.record.get(menu) {
            Some(state) => state.is_expired_at(self.clock.now()),
            None => true,
        }
    }

    /// Captures a new snapshot for `menu` when forced or expired and records
    /// it with `ttl`. Returns whether a capture happened.
    ///
    /// On any failure the record, and the previous snapshot file, are left
    /// as they were.
    pub async fn ensure_fresh(
        &mut self,
        bridge: &dyn Bridge,
        menu: &str,
        ttl: u64,
        force: bool,
    ) -> Result<bool, ControlError> {
        if !force && !self.is_expired(menu) {
            debug!(menu, "snapshot fresh, skipping capture");
            return Ok(false);
        }

        let capture_id = nanoid!();
        let dest = self.snapshot_path(menu);
        async_fs::create_dir_all(self.paths.root())
            .await
            .map_err(|e| ControlError::Store(format!("create_dir: {}", e)))?;
        let tmp = dest.with_extension(format!("{capture_id}.tmp"));

        if let Err(e) = bridge.capture(&tmp).await {
            let _ = async_fs::remove_file(&tmp).await;
            warn!(menu, capture_id = %capture_id, error = %e, "capture failed");
            return Err(e.into());
        }
        if let Err(e) = validate_capture(&tmp).await {
            let _ = async_fs::remove_file(&tmp).await;
            warn!(menu, capture_id = %capture_id, error = %e, "capture rejected");
            return Err(e);
        }
        async_fs::rename(&tmp, &dest)
            .await
            .map_err(|e| ControlError::Store(format!("rename {}: {}", dest.display(), e)))?;

        let mut next = self.record.clone();
        next.insert(menu.to_string(), MenuState { start: self.clock.now(), ttl });
        write_json_atomic(&self.paths.cache_store(), &next)?;
        self.record = next;

        info!(menu, ttl, forced = force, capture_id = %capture_id, "menu snapshot captured");
        Ok(true)
    }
}

/// A capture only replaces the snapshot if it parses as a UI tree.
async fn validate_capture(path: &Path) -> Result<(), ControlError> {
    let xml = async_fs::read_to_string(path)
        .await
        .map_err(|e| ControlError::Store(format!("read {}: {}", path.display(), e)))?;
    flatten(&xml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    const DUMP: &str = r#"<hierarchy><node index="0" text="hi" bounds="[0,0][10,10]"/></hierarchy>"#;

    #[derive(Default)]
    struct FakeBridge {
        captures: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        garbled: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Bridge for FakeBridge {
        async fn execute(&self, _args: &[&str]) -> Result<Vec<u8>, BridgeError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BridgeError::Io("device offline".into()));
            }
            Ok(Vec::new())
        }

        async fn pull(&self, _remote: &str, local: &Path) -> Result<String, BridgeError> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            let xml = if self.garbled.load(Ordering::SeqCst) { "<hierarchy><node></hierarchy" } else { DUMP };
            std::fs::write(local, xml).map_err(|e| BridgeError::Io(e.to_string()))?;
            Ok(String::new())
        }
    }

    fn cache(dir: &TempDir, clock: Arc<ManualClock>) -> SnapshotCache {
        SnapshotCache::load(ProfilePaths::new(dir.path().join("profile")), clock).unwrap()
    }

    #[test]
    fn ttl_boundary_is_strict() {
        let state = MenuState { start: 1000.0, ttl: 60 };
        assert!(!state.is_expired_at(1060.0));
        assert!(state.is_expired_at(1060.001));
        let zero = MenuState { start: 1000.0, ttl: 0 };
        assert!(!zero.is_expired_at(1000.0));
        assert!(zero.is_expired_at(1000.000_1));
    }

    #[tokio::test]
    async fn refresh_within_ttl_captures_once() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1000.0));
        let mut cache = cache(&dir, clock.clone());
        let bridge = FakeBridge::default();

        assert!(cache.ensure_fresh(&bridge, "Home", 1800, false).await.unwrap());
        clock.advance(1800.0);
        assert!(!cache.ensure_fresh(&bridge, "Home", 1800, false).await.unwrap());
        assert_eq!(bridge.captures.load(Ordering::SeqCst), 1);

        clock.advance(0.5);
        assert!(cache.ensure_fresh(&bridge, "Home", 1800, false).await.unwrap());
        assert_eq!(bridge.captures.load(Ordering::SeqCst), 2);
        assert_eq!(cache.state("Home").unwrap().start, 2800.5);
    }

    #[tokio::test]
    async fn zero_ttl_always_recaptures() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(50.0));
        let mut cache = cache(&dir, clock.clone());
        let bridge = FakeBridge::default();

        cache.ensure_fresh(&bridge, "Chat_Bob", 0, false).await.unwrap();
        clock.advance(0.01);
        assert!(cache.is_expired("Chat_Bob"));
        cache.ensure_fresh(&bridge, "Chat_Bob", 0, false).await.unwrap();
        assert_eq!(bridge.captures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn force_ignores_freshness() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache(&dir, Arc::new(ManualClock::new(0.0)));
        let bridge = FakeBridge::default();
        cache.ensure_fresh(&bridge, "Home", 600, false).await.unwrap();
        assert!(cache.ensure_fresh(&bridge, "Home", 600, true).await.unwrap());
        assert_eq!(bridge.captures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_snapshot_file_means_expired() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache(&dir, Arc::new(ManualClock::new(0.0)));
        let bridge = FakeBridge::default();
        cache.ensure_fresh(&bridge, "Home", 600, false).await.unwrap();
        assert!(!cache.is_expired("Home"));
        std::fs::remove_file(cache.snapshot_path("Home")).unwrap();
        assert!(cache.is_expired("Home"));
    }

    #[tokio::test]
    async fn bridge_failure_leaves_record_untouched() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0.0));
        let mut cache = cache(&dir, clock.clone());
        let bridge = FakeBridge::default();
        cache.ensure_fresh(&bridge, "Home", 10, false).await.unwrap();
        let before = cache.record().clone();
        let stored_before = std::fs::read(dir.path().join("profile/menu_update_times.json")).unwrap();

        clock.advance(100.0);
        bridge.fail.store(true, Ordering::SeqCst);
        let err = cache.ensure_fresh(&bridge, "Home", 10, false).await.unwrap_err();
        assert!(matches!(err, ControlError::Bridge(_)));
        assert_eq!(cache.record(), &before);
        assert_eq!(
            std::fs::read(dir.path().join("profile/menu_update_times.json")).unwrap(),
            stored_before
        );
        assert_eq!(std::fs::read_to_string(cache.snapshot_path("Home")).unwrap(), DUMP);
    }

    #[tokio::test]
    async fn malformed_capture_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0.0));
        let mut cache = cache(&dir, clock.clone());
        let bridge = FakeBridge::default();
        cache.ensure_fresh(&bridge, "Home", 10, false).await.unwrap();
        let before = cache.record().clone();

        clock.advance(100.0);
        bridge.garbled.store(true, Ordering::SeqCst);
        let err = cache.ensure_fresh(&bridge, "Home", 10, false).await.unwrap_err();
        assert!(matches!(err, ControlError::Parse(_)), "{err}");
        assert_eq!(cache.record(), &before);
        assert!(cache.is_expired("Home"));
        assert_eq!(std::fs::read_to_string(cache.snapshot_path("Home")).unwrap(), DUMP);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("profile"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        // Once the device dumps cleanly again the menu is re-captured.
        bridge.garbled.store(false, Ordering::SeqCst);
        assert!(cache.ensure_fresh(&bridge, "Home", 10, false).await.unwrap());
        assert!(!cache.is_expired("Home"));
    }

    #[tokio::test]
    async fn first_capture_malformed_leaves_no_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache(&dir, Arc::new(ManualClock::new(0.0)));
        let bridge = FakeBridge::default();
        bridge.garbled.store(true, Ordering::SeqCst);
        assert!(cache.ensure_fresh(&bridge, "Home", 1800, false).await.is_err());
        assert!(cache.state("Home").is_none());
        assert!(!cache.snapshot_path("Home").exists());
    }

    #[tokio::test]
    async fn record_survives_reload() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(42.0));
        let bridge = FakeBridge::default();
        {
            let mut cache = cache(&dir, clock.clone());
            cache.ensure_fresh(&bridge, "Home", 1800, false).await.unwrap();
        }
        let reloaded = cache(&dir, clock);
        assert_eq!(reloaded.state("Home"), Some(&MenuState { start: 42.0, ttl: 1800 }));
        assert!(!reloaded.is_expired("Home"));
    }

    #[test]
    fn corrupt_store_is_reinitialized() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("profile");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("menu_update_times.json"), b"{not json").unwrap();

        let cache = SnapshotCache::load(ProfilePaths::new(&root), Arc::new(SystemClock)).unwrap();
        assert!(cache.record().is_empty());
        let stored: CacheRecord =
            serde_json::from_slice(&std::fs::read(root.join("menu_update_times.json")).unwrap()).unwrap();
        assert!(stored.is_empty());
    }

    #[test]
    fn store_uses_start_and_ttl_keys() {
        let json = r#"{"Home": {"start": 1700000000.25, "ttl": 1800}}"#;
        let record: CacheRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record["Home"], MenuState { start: 1_700_000_000.25, ttl: 1800 });
    }
}
