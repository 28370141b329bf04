use crate::bridge::Bridge;
use crate::cache::{Clock, SnapshotCache, SystemClock};
use crate::config::ControllerConfig;
use crate::conversation::{screen_text, ChatHistory, ConversationTurn, Reconstructor};
use crate::coords::Point;
use crate::error::ControlError;
use crate::history::ChatHistoryStore;
use crate::profile::{ProfileLock, ProfilePaths};
use crate::query;
use crate::tree::{Node, Tree};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Drives one app profile on one device.
///
/// The controller owns the snapshot cache and the "current menu" /
/// "current package" fields. Every method takes `&mut self` and awaits each
/// bridge call in turn, so actions reach the device in call order.
pub struct Controller<B: Bridge> {
    bridge: B,
    cfg: ControllerConfig,
    paths: ProfilePaths,
    cache: SnapshotCache,
    history: ChatHistoryStore,
    reconstructor: Reconstructor,
    current_menu: Option<String>,
    current_package: Option<String>,
    _lock: ProfileLock,
}

impl<B: Bridge> Controller<B> {
    pub fn open(bridge: B, cfg: ControllerConfig) -> Result<Self, ControlError> {
        Self::open_with_clock(bridge, cfg, Arc::new(SystemClock))
    }

    /// Locks the profile directory and loads its cache record.
    pub fn open_with_clock(bridge: B, cfg: ControllerConfig, clock: Arc<dyn Clock>) -> Result<Self, ControlError> {
        let paths = ProfilePaths::from_config(&cfg);
        let lock = ProfileLock::acquire(&paths)?;
        let cache = SnapshotCache::load(paths.clone(), clock)?;
        info!(
            controller = %cfg.controller_name,
            profile = %cfg.profile_name,
            root = %paths.root().display(),
            "controller opened"
        );
        Ok(Self {
            bridge,
            history: ChatHistoryStore::new(paths.clone()),
            cfg,
            paths,
            cache,
            reconstructor: Reconstructor::default(),
            current_menu: None,
            current_package: None,
            _lock: lock,
        })
    }

    pub fn with_reconstructor(mut self, reconstructor: Reconstructor) -> Self {
        self.reconstructor = reconstructor;
        self
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn paths(&self) -> &ProfilePaths {
        &self.paths
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn current_menu(&self) -> Option<&str> {
        self.current_menu.as_deref()
    }

    pub fn current_package(&self) -> Option<&str> {
        self.current_package.as_deref()
    }

    /// Records `package` as the app in front without launching anything.
    pub fn set_current_package(&mut self, package: impl Into<String>) {
        self.current_package = Some(package.into());
    }

    // ========================= Menu lifecycle =========================

    /// Moves to `menu`. The current menu changes unconditionally; a capture
    /// only happens when the menu's snapshot has expired. Returns whether a
    /// capture happened.
    pub async fn change_menu(&mut self, menu: &str, ttl: u64) -> Result<bool, ControlError> {
        self.current_menu = Some(menu.to_string());
        info!(menu, ttl, "menu change");
        self.cache.ensure_fresh(&self.bridge, menu, ttl, false).await
    }

    /// Re-captures the current menu if it expired (or always, with `force`),
    /// keeping its recorded TTL.
    pub async fn refresh(&mut self, force: bool) -> Result<bool, ControlError> {
        let menu = self.current_menu.clone().ok_or(ControlError::NoMenu)?;
        let ttl = self.cache.state(&menu).map_or(self.cfg.default_ttl, |s| s.ttl);
        self.cache.ensure_fresh(&self.bridge, &menu, ttl, force).await
    }

    /// The current menu's tree, refreshed first if it has expired.
    pub async fn tree(&mut self) -> Result<Tree, ControlError> {
        self.refresh(false).await?;
        self.cached_tree()
    }

    /// The current menu's tree as last captured.
    pub fn cached_tree(&self) -> Result<Tree, ControlError> {
        let menu = self.current_menu.as_deref().ok_or(ControlError::NoMenu)?;
        Tree::load(&self.cache.snapshot_path(menu))
    }

    /// Captures the screen to an arbitrary file, bypassing the cache.
    pub async fn capture_to(&mut self, path: &Path) -> Result<Tree, ControlError> {
        self.bridge.capture(path).await?;
        Tree::load(path)
    }

    // ========================= Queries & input =========================

    pub async fn find_node<P>(&mut self, predicate: P) -> Result<Option<Node>, ControlError>
    where
        P: Fn(&Node) -> bool,
    {
        let tree = self.tree().await?;
        Ok(query::find_first(tree.nodes(), predicate).cloned())
    }

    pub async fn find_nodes<P>(&mut self, predicate: P) -> Result<Vec<Node>, ControlError>
    where
        P: Fn(&Node) -> bool,
    {
        let tree = self.tree().await?;
        Ok(query::find_all(tree.nodes(), predicate).into_iter().cloned().collect())
    }

    pub async fn find_coords<P>(&mut self, predicate: P) -> Result<Option<Point>, ControlError>
    where
        P: Fn(&Node) -> bool,
    {
        match self.find_node(predicate).await? {
            Some(node) => Ok(Some(node.centroid()?)),
            None => Ok(None),
        }
    }

    pub async fn tap(&mut self, at: Point) -> Result<(), ControlError> {
        self.bridge.tap(at).await?;
        Ok(())
    }

    pub async fn tap_node(&mut self, node: &Node) -> Result<(), ControlError> {
        let at = node.centroid()?;
        self.tap(at).await
    }

    pub async fn swipe(&mut self, from: Point, to: Point, duration: Duration) -> Result<(), ControlError> {
        self.bridge.swipe(from, to, duration).await?;
        Ok(())
    }

    pub async fn screen_size(&mut self) -> Result<(u32, u32), ControlError> {
        Ok(self.bridge.screen_size().await?)
    }

    pub async fn battery(&mut self) -> Result<String, ControlError> {
        Ok(self.bridge.battery().await?)
    }

    // ========================= Packages =========================

    /// Launches `package/activity` unless it is already the current package.
    pub async fn open_package(&mut self, package: &str, activity: &str) -> Result<bool, ControlError> {
        if self.current_package.as_deref() == Some(package) {
            return Ok(false);
        }
        let component = format!("{package}/{activity}");
        self.bridge.execute(&["am", "start", "-n", &component]).await?;
        self.current_package = Some(package.to_string());
        info!(package, activity, "package opened");
        Ok(true)
    }

    pub async fn close_package(&mut self) -> Result<(), ControlError> {
        let package = self.current_package.clone().ok_or(ControlError::NoPackage)?;
        self.bridge.execute(&["am", "force-stop", &package]).await?;
        self.current_package = None;
        info!(package = %package, "package closed");
        Ok(())
    }

    // ========================= Conversations =========================

    /// Enters the always-refetched `Chat_<peer>` menu and rebuilds the visible
    /// conversation from the current package's on-screen text.
    pub async fn read_conversation(&mut self, peer: &str) -> Result<Vec<ConversationTurn>, ControlError> {
        let package = self.current_package.clone().ok_or(ControlError::NoPackage)?;
        self.change_menu(&format!("Chat_{peer}"), 0).await?;
        let tree = self.cached_tree()?;
        let fragments = screen_text(tree.nodes(), &package);
        let turns = self.reconstructor.reconstruct(fragments.as_slice(), peer);
        info!(peer, fragments = fragments.len(), turns = turns.len(), "conversation read");
        Ok(turns)
    }

    pub fn chat_history(&self, peer: &str) -> Result<Option<ChatHistory>, ControlError> {
        self.history.load(peer)
    }

    /// Reads the conversation with `peer` and appends what is new to the
    /// stored history.
    pub async fn sync_conversation(&mut self, peer: &str) -> Result<ChatHistory, ControlError> {
        let mut history = self.history.load(peer)?.unwrap_or_else(|| ChatHistory::new(peer));
        let turns = self.read_conversation(peer).await?;
        let added = history.merge(turns);
        if added > 0 {
            self.history.save(&history)?;
        }
        info!(peer, added, total = history.turns.len(), "chat history synced");
        Ok(history)
    }
}
