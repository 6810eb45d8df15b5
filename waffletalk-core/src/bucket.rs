//! Bucket: one sorted, bounded run of an ordered set.
//!
//! Holds member ids in comparator order plus the skip-list links for every
//! rank the bucket participates in. Emission and source registration are
//! driven by the owning [`OrderedSet`](crate::OrderedSet); this type only
//! keeps the run and the links consistent.

use std::cmp::Ordering;

use crate::graph::NodeId;
use crate::identity::Snowflake;

pub use crate::signal::BucketId;

/// Backward link target: either the head sentinel or another bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Head,
    Bucket(BucketId),
}

#[derive(Debug)]
pub struct Bucket {
    id: BucketId,
    node: NodeId,
    trap: NodeId,
    pub(crate) members: Vec<Snowflake>,
    pub(crate) next: Vec<Option<BucketId>>,
    pub(crate) prev: Vec<Link>,
}

impl Bucket {
    pub(crate) fn new(id: BucketId, node: NodeId, trap: NodeId) -> Self {
        Self {
            id,
            node,
            trap,
            members: Vec::new(),
            next: Vec::new(),
            prev: Vec::new(),
        }
    }

    pub fn id(&self) -> BucketId {
        self.id
    }

    /// Node emitting this bucket's shifts and forwarded mutations.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Node receiving member mutations.
    pub fn trap(&self) -> NodeId {
        self.trap
    }

    pub fn members(&self) -> &[Snowflake] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn min(&self) -> Option<Snowflake> {
        self.members.first().copied()
    }

    pub fn max(&self) -> Option<Snowflake> {
        self.members.last().copied()
    }

    /// Number of skip-list ranks this bucket is linked at.
    pub fn ranks(&self) -> usize {
        self.next.len()
    }

    /// Rank-0 successor.
    pub fn next(&self) -> Option<BucketId> {
        self.next.first().copied().flatten()
    }

    /// Rank-0 predecessor, `None` when first in the chain.
    pub fn prev(&self) -> Option<BucketId> {
        match self.prev.first() {
            Some(Link::Bucket(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn contains(&self, id: Snowflake) -> bool {
        self.members.contains(&id)
    }

    pub(crate) fn position(&self, id: Snowflake) -> Option<usize> {
        self.members.iter().position(|m| *m == id)
    }

    /// Insert keeping comparator order. Equal keys land after existing ones.
    pub(crate) fn insert<F>(&mut self, id: Snowflake, cmp: F) -> usize
    where
        F: Fn(Snowflake, Snowflake) -> Ordering,
    {
        match self.members.last() {
            None => {
                self.members.push(id);
                0
            }
            Some(max) if cmp(*max, id) != Ordering::Greater => {
                self.members.push(id);
                self.members.len() - 1
            }
            Some(_) => {
                let at = self
                    .members
                    .iter()
                    .position(|m| cmp(*m, id) == Ordering::Greater)
                    .unwrap_or(self.members.len());
                self.members.insert(at, id);
                at
            }
        }
    }

    pub(crate) fn remove(&mut self, id: Snowflake) -> bool {
        match self.position(id) {
            Some(at) => {
                self.members.remove(at);
                true
            }
            None => false,
        }
    }
}
