//! Index-addressed signal graph.
//!
//! Nodes live in a slot arena and are referred to by generational
//! [`NodeId`] handles. Every edge is stored on both endpoints: adding A as a
//! source of B also records B as a sink of A, and teardown removes both
//! halves. A stale handle (node destroyed, slot reused) never resolves.

use rustc_hash::FxHashSet;

use crate::ordered_set::SetId;
use crate::signal::BucketId;

/// Handle to a node in the [`SignalGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// What a node does with an incoming signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Re-emit to every sink (records, buckets, set relays).
    Relay,
    /// Inspect a member mutation, forward it or repair the bucket.
    Trap { set: SetId, bucket: BucketId },
    /// Hand the signal to an attached terminal.
    Terminal,
}

#[derive(Debug)]
struct Node {
    role: Role,
    sources: FxHashSet<NodeId>,
    sinks: FxHashSet<NodeId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug, Default)]
pub struct SignalGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl SignalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node with no edges.
    pub fn insert(&mut self, role: Role) -> NodeId {
        let node = Node {
            role,
            sources: FxHashSet::default(),
            sinks: FxHashSet::default(),
        };
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn role(&self, id: NodeId) -> Option<Role> {
        self.node(id).map(|n| n.role)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Wire `source` into `sink`. Idempotent; returns false if either end is gone.
    pub fn add_source(&mut self, sink: NodeId, source: NodeId) -> bool {
        if sink == source || !self.contains(sink) || !self.contains(source) {
            return false;
        }
        if let Some(n) = self.node_mut(sink) {
            n.sources.insert(source);
        }
        if let Some(n) = self.node_mut(source) {
            n.sinks.insert(sink);
        }
        true
    }

    /// Remove the `source` → `sink` edge from both endpoints. Idempotent.
    pub fn remove_source(&mut self, sink: NodeId, source: NodeId) {
        if let Some(n) = self.node_mut(sink) {
            n.sources.remove(&source);
        }
        if let Some(n) = self.node_mut(source) {
            n.sinks.remove(&sink);
        }
    }

    /// Snapshot of the current sinks of `id`.
    pub fn sinks(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| n.sinks.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the current sources of `id`.
    pub fn sources(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| n.sources.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_edge(&self, sink: NodeId, source: NodeId) -> bool {
        self.node(sink).is_some_and(|n| n.sources.contains(&source))
    }

    /// Detach `id` from every neighbour and free its slot. O(degree).
    pub fn destroy(&mut self, id: NodeId) -> bool {
        let Some(node) = self.slot_mut(id).and_then(|s| s.node.take()) else {
            return false;
        };
        for source in &node.sources {
            if let Some(n) = self.node_mut(*source) {
                n.sinks.remove(&id);
            }
        }
        for sink in &node.sinks {
            if let Some(n) = self.node_mut(*sink) {
                n.sources.remove(&id);
            }
        }
        let slot = &mut self.slots[id.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        true
    }

    /// Every edge is present on both of its endpoints.
    pub fn is_consistent(&self) -> bool {
        self.slots.iter().enumerate().all(|(index, slot)| {
            let Some(node) = &slot.node else { return true };
            let id = NodeId {
                index: index as u32,
                generation: slot.generation,
            };
            node.sources
                .iter()
                .all(|s| self.node(*s).is_some_and(|n| n.sinks.contains(&id)))
                && node
                    .sinks
                    .iter()
                    .all(|s| self.node(*s).is_some_and(|n| n.sources.contains(&id)))
        })
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slot_mut(id).and_then(|s| s.node.as_mut())
    }
}
