//! Rebuilding a chat transcript from text scraped off the screen.
//!
//! A chat screen renders as a flat run of labels: a speaker header (`ME`, or
//! the peer's name in capitals) followed by that speaker's messages, with date
//! dividers mixed in. [`Reconstructor`] walks that run and groups messages into
//! [`ConversationTurn`]s.

use crate::tree::Node;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: String,
    pub messages: Vec<String>,
}

impl ConversationTurn {
    pub fn new(speaker: impl Into<String>, messages: Vec<String>) -> Self {
        Self { speaker: speaker.into(), messages }
    }
}

#[derive(Clone, Debug)]
pub struct ReconstructorConfig {
    /// Header the app shows above the local user's messages. Compared exactly.
    pub self_marker: String,
    /// Labels that are never message content (date dividers, blanks).
    pub filtered: BTreeSet<String>,
}

impl Default for ReconstructorConfig {
    fn default() -> Self {
        Self {
            self_marker: "ME".into(),
            filtered: ["TODAY", ""].into_iter().map(String::from).collect(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Reconstructor {
    cfg: ReconstructorConfig,
}

enum Fragment {
    Me,
    Peer,
    Filtered,
    Message,
}

impl Reconstructor {
    pub fn new(cfg: ReconstructorConfig) -> Self {
        Self { cfg }
    }

    pub fn self_marker(&self) -> &str {
        &self.cfg.self_marker
    }

    fn classify(&self, text: &str, peer_marker: &str) -> Fragment {
        if text == self.cfg.self_marker {
            Fragment::Me
        } else if !peer_marker.is_empty() && text == peer_marker {
            Fragment::Peer
        } else if self.cfg.filtered.contains(text) {
            Fragment::Filtered
        } else {
            Fragment::Message
        }
    }

    /// Groups `fragments` into turns. Fragments before the first speaker
    /// header are dropped; the buffer still pending at the end of the input
    /// is emitted as the last turn.
    pub fn reconstruct<S: AsRef<str>>(&self, fragments: &[S], peer: &str) -> Vec<ConversationTurn> {
        let peer_marker = peer.to_uppercase();
        let mut turns = Vec::new();
        let mut speaker: Option<&str> = None;
        let mut buffer: Vec<String> = Vec::new();

        for fragment in fragments {
            let text: &str = fragment.as_ref();
            let next = match self.classify(text, &peer_marker) {
                Fragment::Me => self.cfg.self_marker.as_str(),
                Fragment::Peer => peer,
                Fragment::Filtered => continue,
                Fragment::Message => {
                    if speaker.is_some() {
                        buffer.push(text.to_string());
                    }
                    continue;
                }
            };
            if let Some(previous) = speaker {
                if !buffer.is_empty() {
                    turns.push(ConversationTurn::new(previous, std::mem::take(&mut buffer)));
                }
            }
            speaker = Some(next);
        }

        if let Some(last) = speaker {
            if !buffer.is_empty() {
                turns.push(ConversationTurn::new(last, buffer));
            }
        }
        turns
    }
}

/// Non-empty `text` of every node belonging to `package`, in document order.
pub fn screen_text(nodes: &[Node], package: &str) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| n.attr("package") == Some(package))
        .filter_map(Node::text)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Stored transcript with one peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistory {
    pub peer: String,
    pub turns: Vec<ConversationTurn>,
}

impl ChatHistory {
    pub fn new(peer: impl Into<String>) -> Self {
        Self { peer: peer.into(), turns: Vec::new() }
    }

    /// Appends freshly read turns, skipping the leading part that repeats the
    /// stored tail. The last repeated turn may have grown on screen since it
    /// was stored (same speaker, stored messages a prefix of the new ones);
    /// it then replaces the stored turn. Returns how many turns were added
    /// or extended.
    pub fn merge(&mut self, read: Vec<ConversationTurn>) -> usize {
        let stored = self.turns.len();
        let max = stored.min(read.len());
        let overlap = (1..=max)
            .rev()
            .find(|&k| {
                let tail = &self.turns[stored - k..];
                tail[..k - 1] == read[..k - 1] && extends(&tail[k - 1], &read[k - 1])
            })
            .unwrap_or(0);

        let mut changed = 0;
        let mut read = read.into_iter();
        if overlap > 0 {
            let mut repeated = read.by_ref().take(overlap);
            if let Some(last) = repeated.nth(overlap - 1) {
                if last.messages.len() > self.turns[stored - 1].messages.len() {
                    self.turns[stored - 1] = last;
                    changed += 1;
                }
            }
        }
        let before = self.turns.len();
        self.turns.extend(read);
        changed + self.turns.len() - before
    }
}

fn extends(stored: &ConversationTurn, read: &ConversationTurn) -> bool {
    stored.speaker == read.speaker && read.messages.starts_with(&stored.messages)
}
