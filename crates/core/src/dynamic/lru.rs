//! Serializable least-recently-used chain of URLs.
//!
//! A doubly linked list whose nodes name their neighbours by URL instead of
//! holding references, so the whole chain is plain data that can be written
//! to the ledger after every mutation and read back after a restart.
//!
//! ```text
//!   head ──► /c ◄──► /b ◄──► /a ◄── tail
//!   (most recently used)      (least recently used)
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A node in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionNode {
    /// The URL tracked by this node.
    pub url: String,

    /// The more recently used neighbour, or `None` for the head.
    pub previous: Option<String>,

    /// The less recently used neighbour, or `None` for the tail.
    pub next: Option<String>,
}

/// Persisted state of an entire chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionChainState {
    pub head: Option<String>,
    pub tail: Option<String>,
    pub nodes: HashMap<String, EvictionNode>,
    pub count: usize,
}

/// Owns an `EvictionChainState` and keeps it consistent across mutations.
///
/// All operations are synchronous; persisting the state is up to the owner.
#[derive(Debug, Clone, Default)]
pub struct EvictionChain {
    state: EvictionChainState,
}

impl EvictionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a chain from persisted state.
    ///
    /// Returns `None` if the state breaks a chain invariant (orphans, cycles,
    /// a stale count); the caller starts over with an empty chain.
    pub fn from_state(state: EvictionChainState) -> Option<Self> {
        let chain = Self { state };
        chain.is_consistent().then_some(chain)
    }

    pub fn state(&self) -> &EvictionChainState {
        &self.state
    }

    /// The current count of URLs in the chain.
    pub fn size(&self) -> usize {
        self.state.count
    }

    pub fn is_empty(&self) -> bool {
        self.state.count == 0
    }

    pub fn contains(&self, url: &str) -> bool {
        self.state.nodes.contains_key(url)
    }

    pub fn head(&self) -> Option<&str> {
        self.state.head.as_deref()
    }

    pub fn tail(&self) -> Option<&str> {
        self.state.tail.as_deref()
    }

    /// Iterate from most to least recently used.
    pub fn iter(&self) -> Iter<'_> {
        Iter { nodes: &self.state.nodes, cursor: self.state.head.as_deref(), remaining: self.state.count }
    }

    /// Mark `url` as the most recently used, inserting it if untracked.
    pub fn accessed(&mut self, url: &str) {
        if self.state.head.as_deref() == Some(url) {
            return;
        }

        // Promotion of a tracked URL is an excise followed by a head insert;
        // the count drops in `remove` and comes back below.
        self.remove(url);

        let old_head = self.state.head.replace(url.to_string());
        if let Some(node) = old_head.as_deref().and_then(|h| self.state.nodes.get_mut(h)) {
            node.previous = Some(url.to_string());
        }
        if self.state.tail.is_none() {
            self.state.tail = Some(url.to_string());
        }

        self.state
            .nodes
            .insert(url.to_string(), EvictionNode { url: url.to_string(), previous: None, next: old_head });
        self.state.count += 1;
    }

    /// Excise `url` from the chain. Returns false if it was not tracked.
    pub fn remove(&mut self, url: &str) -> bool {
        let Some(node) = self.state.nodes.remove(url) else {
            return false;
        };

        match node.previous.as_deref() {
            Some(prev) => {
                if let Some(prev_node) = self.state.nodes.get_mut(prev) {
                    prev_node.next = node.next.clone();
                }
            }
            None => self.state.head = node.next.clone(),
        }

        match node.next.as_deref() {
            Some(next) => {
                if let Some(next_node) = self.state.nodes.get_mut(next) {
                    next_node.previous = node.previous.clone();
                }
            }
            None => self.state.tail = node.previous.clone(),
        }

        self.state.count = self.state.count.saturating_sub(1);
        true
    }

    /// Remove and return the least recently used URL.
    pub fn pop(&mut self) -> Option<String> {
        let url = self.state.tail.clone()?;
        self.remove(&url);
        Some(url)
    }

    /// Check every structural invariant of the chain.
    pub fn is_consistent(&self) -> bool {
        let state = &self.state;
        if state.count != state.nodes.len() {
            return false;
        }
        if state.count == 0 {
            return state.head.is_none() && state.tail.is_none();
        }

        let mut seen = HashSet::with_capacity(state.count);
        let mut previous: Option<&str> = None;
        let mut cursor = state.head.as_deref();
        while let Some(url) = cursor {
            let Some(node) = state.nodes.get(url) else {
                return false;
            };
            if node.url != url || node.previous.as_deref() != previous || !seen.insert(url) {
                return false;
            }
            previous = Some(url);
            cursor = node.next.as_deref();
        }

        seen.len() == state.count && previous == state.tail.as_deref()
    }
}

/// Iterator over chain URLs, most recently used first.
pub struct Iter<'a> {
    nodes: &'a HashMap<String, EvictionNode>,
    cursor: Option<&'a str>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.nodes.get(self.cursor?)?;
        self.cursor = node.next.as_deref();
        self.remaining -= 1;
        Some(node.url.as_str())
    }
}
