pub mod bridge;
pub mod cache;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod coords;
pub mod error;
pub mod history;
pub mod profile;
pub mod query;
pub mod tree;

pub use bridge::{AdbBridge, Bridge};
pub use cache::{Clock, ManualClock, MenuState, SnapshotCache, SystemClock};
pub use config::{AdbConfig, ControllerConfig};
pub use controller::Controller;
pub use conversation::{ChatHistory, ConversationTurn, Reconstructor, ReconstructorConfig};
pub use coords::{centroid, Point};
pub use error::{BridgeError, ControlError, ParseError};
pub use tree::{flatten, Node, Tree};
