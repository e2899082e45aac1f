//! Weak peer groups linking the rows of one result set.
//!
//! Every row materialized by one query realization holds an `Arc` to the same
//! [`PeerGroup`], and the group holds only `Weak` handles back to the rows.
//! Dropping a row therefore removes it from its peers without any
//! bookkeeping, and the group itself is freed with its last row.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

/// The rows produced together by one result-set realization.
///
/// Membership is fixed at construction; only liveness changes afterwards.
pub struct PeerGroup<M> {
    members: Vec<Weak<M>>,
    index: HashMap<usize, usize>,
}

fn address<M>(row: &M) -> usize {
    std::ptr::from_ref(row) as usize
}

impl<M> PeerGroup<M> {
    /// Group the given rows, in order.
    ///
    /// The same instance listed twice is kept once. Returns `None` when fewer
    /// than two distinct instances remain, since a lone row has no peers to
    /// batch with.
    pub fn build(rows: &[Arc<M>]) -> Option<Arc<Self>> {
        let mut members = Vec::with_capacity(rows.len());
        let mut index = HashMap::with_capacity(rows.len());
        for row in rows {
            let addr = address(row.as_ref());
            if index.contains_key(&addr) {
                continue;
            }
            index.insert(addr, members.len());
            members.push(Arc::downgrade(row));
        }
        if members.len() < 2 {
            return None;
        }
        Some(Arc::new(Self { members, index }))
    }

    /// Number of members still alive.
    pub fn len(&self) -> usize {
        self.members.iter().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rows the group was built with, dead or alive.
    pub fn capacity(&self) -> usize {
        self.members.len()
    }

    /// Whether `row` is a live member of this group.
    pub fn contains(&self, row: &M) -> bool {
        self.index
            .get(&address(row))
            .and_then(|&pos| self.members.get(pos))
            .is_some_and(|w| w.strong_count() > 0)
    }

    /// Strong handles to the members still alive, in original order.
    pub fn living(&self) -> Vec<Arc<M>> {
        self.members.iter().filter_map(Weak::upgrade).collect()
    }

    /// Live members for which `is_resolved` is false.
    pub fn living_peers_excluding<F>(&self, is_resolved: F) -> Vec<Arc<M>>
    where
        F: Fn(&M) -> bool,
    {
        self.members
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|row| !is_resolved(row))
            .collect()
    }
}

impl<M> fmt::Debug for PeerGroup<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerGroup")
            .field("capacity", &self.capacity())
            .field("live", &self.len())
            .finish()
    }
}

/// A row's back-reference to its peer group.
///
/// Set at most once, by the materializer. A clone of a row is a new instance
/// outside any result set, so cloning yields an empty slot, and so does
/// deserializing: the slot is always written as `null`.
pub struct PeerSlot<M> {
    group: OnceLock<Arc<PeerGroup<M>>>,
}

impl<M> PeerSlot<M> {
    pub const fn new() -> Self {
        Self {
            group: OnceLock::new(),
        }
    }

    /// The attached group, if any.
    pub fn get(&self) -> Option<&Arc<PeerGroup<M>>> {
        self.group.get()
    }

    /// Attach `group`. Returns `false` when a group was already attached.
    pub fn attach(&self, group: Arc<PeerGroup<M>>) -> bool {
        self.group.set(group).is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.group.get().is_some()
    }
}

impl<M> Default for PeerSlot<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for PeerSlot<M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for PeerSlot<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.group.get() {
            Some(group) => write!(f, "PeerSlot({} live)", group.len()),
            None => write!(f, "PeerSlot(detached)"),
        }
    }
}

impl<M> Serialize for PeerSlot<M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_none()
    }
}

impl<'de, M> Deserialize<'de> for PeerSlot<M> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde::de::IgnoredAny::deserialize(deserializer)?;
        Ok(Self::new())
    }
}
