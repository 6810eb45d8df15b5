//! Comparator-sorted collection of records, indexed by a skip list of buckets.
//!
//! ```text
//! rank 2  head ─────────────────────────────► B3 ──────────► ∅
//! rank 1  head ─────────────► B2 ───────────► B3 ──────────► ∅
//! rank 0  head ──► B1 ──────► B2 ──► B4 ────► B3 ──► B5 ───► ∅
//!                 [1 3]      [4 5]  [6 8]    [9 9]  [12]
//! ```
//!
//! Buckets hold at most `max_bucket_size` members and their key ranges never
//! overlap. A bucket is created only by splitting an over-full one, and is
//! unlinked only when a removal empties it (the sole bucket is kept).
//! Both changes queue a `bucket.link` signal for every bucket whose rank-0
//! neighbours moved.
//! Every bucket node is wired into the set's relay node, so a sink
//! subscribed to the relay sees shifts from buckets created later on.

use std::cmp::Ordering;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::bucket::{Bucket, BucketId, Link};
use crate::graph::{NodeId, Role, SignalGraph};
use crate::identity::Snowflake;
use crate::promotion::Promotion;
use crate::replicable::Replicable;
use crate::signal::{Relink, Shift, Signal, Snapshot};

/// Live records, keyed by identity.
pub type Records<K> = FxHashMap<Snowflake, Replicable<K>>;

/// Total order over records of one collection.
pub type Comparator<K> = Box<dyn Fn(&Replicable<K>, &Replicable<K>) -> Ordering + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SetId(pub(crate) u32);

impl SetId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordered set tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetConfig {
    /// Upper bound on members per bucket (default: 64)
    pub max_bucket_size: usize,
    /// Chance a split bucket is also linked one rank up (default: 0.5)
    pub promotion_probability: f64,
}

impl Default for SetConfig {
    fn default() -> Self {
        Self {
            max_bucket_size: 64,
            promotion_probability: 0.5,
        }
    }
}

/// What a structural change leaves for the hub to do once the set is
/// consistent again: emit `signals` in order, then destroy `doomed`.
///
/// An unlinked bucket's node must outlive the dispatch of its last shift.
pub(crate) struct Outbox<K> {
    pub signals: Vec<(NodeId, Signal<K>)>,
    pub doomed: Vec<NodeId>,
}

impl<K> Outbox<K> {
    pub fn new() -> Self {
        Self {
            signals: Vec::new(),
            doomed: Vec::new(),
        }
    }

    pub fn push(&mut self, origin: NodeId, signal: Signal<K>) {
        self.signals.push((origin, signal));
    }
}

/// Everything outside the set that a structural change touches.
pub(crate) struct Scope<'a, K> {
    pub records: &'a Records<K>,
    pub graph: &'a mut SignalGraph,
    pub bucket_ids: &'a mut u64,
    pub outbox: &'a mut Outbox<K>,
}

pub struct OrderedSet<K> {
    id: SetId,
    node: NodeId,
    comparator: Comparator<K>,
    config: SetConfig,
    promotion: Box<dyn Promotion>,
    /// First bucket at each rank. Its length is the number of ranks in use.
    head: Vec<Option<BucketId>>,
    buckets: FxHashMap<BucketId, Bucket>,
    index: FxHashMap<Snowflake, BucketId>,
}

impl<K: Copy> OrderedSet<K> {
    pub(crate) fn new(
        id: SetId,
        comparator: Comparator<K>,
        config: SetConfig,
        promotion: Box<dyn Promotion>,
        graph: &mut SignalGraph,
        bucket_ids: &mut u64,
    ) -> Self {
        let mut set = Self {
            id,
            node: graph.insert(Role::Relay),
            comparator,
            config,
            promotion,
            head: Vec::new(),
            buckets: FxHashMap::default(),
            index: FxHashMap::default(),
        };
        let first = set.create_bucket(graph, bucket_ids);
        if let Some(b) = set.buckets.get_mut(&first) {
            b.next.push(None);
            b.prev.push(Link::Head);
        }
        set.head.push(Some(first));
        set
    }

    pub fn id(&self) -> SetId {
        self.id
    }

    /// Relay node every bucket of this set is wired into.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn config(&self) -> SetConfig {
        self.config
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of skip-list ranks in use.
    pub fn ranks(&self) -> usize {
        self.head.len()
    }

    pub fn contains(&self, id: Snowflake) -> bool {
        self.index.contains_key(&id)
    }

    pub fn bucket_of(&self, id: Snowflake) -> Option<BucketId> {
        self.index.get(&id).copied()
    }

    pub fn bucket(&self, id: BucketId) -> Option<&Bucket> {
        self.buckets.get(&id)
    }

    /// Buckets in ascending key order.
    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> + '_ {
        std::iter::successors(self.head.first().copied().flatten(), move |b| {
            self.buckets.get(b).and_then(Bucket::next)
        })
        .filter_map(move |b| self.buckets.get(&b))
    }

    /// Member ids in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = Snowflake> + '_ {
        self.buckets().flat_map(|b| b.members().iter().copied())
    }

    /// Buckets linked at `rank`, in order.
    pub fn chain(&self, rank: usize) -> Vec<BucketId> {
        let mut out = Vec::new();
        let mut cursor = self.next_of(Link::Head, rank);
        while let Some(b) = cursor {
            out.push(b);
            cursor = self.next_of(Link::Bucket(b), rank);
        }
        out
    }

    /// Insert `id`. No-op (false) if it is already a member.
    pub(crate) fn add(&mut self, id: Snowflake, scope: &mut Scope<'_, K>) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }
        let entry = record(scope.records, id);
        let record_node = entry.node();
        let snapshot = entry.snapshot();

        let (target, path) = self.fit(id, scope.records);
        let comparator = &self.comparator;
        let records = scope.records;
        let bucket = bucket_mut(&mut self.buckets, target);
        bucket.insert(id, |a, b| order(comparator, records, a, b));
        scope.outbox.push(
            bucket.node(),
            Signal::shift(Shift {
                bucket: target,
                add: vec![snapshot],
                remove: Vec::new(),
            }),
        );
        scope.graph.add_source(bucket.trap(), record_node);
        self.index.insert(id, target);

        while bucket_ref(&self.buckets, target).len() > self.config.max_bucket_size {
            self.split(target, &path, scope);
        }
        true
    }

    /// Remove `id`. No-op (false) if it is not a member.
    pub(crate) fn remove(&mut self, id: Snowflake, scope: &mut Scope<'_, K>) -> bool {
        let Some(target) = self.index.remove(&id) else {
            return false;
        };
        let bucket = bucket_mut(&mut self.buckets, target);
        if let Some(r) = scope.records.get(&id) {
            scope.graph.remove_source(bucket.trap(), r.node());
        }
        scope.outbox.push(
            bucket.node(),
            Signal::shift(Shift {
                bucket: target,
                add: Vec::new(),
                remove: vec![id],
            }),
        );
        bucket.remove(id);
        if bucket.is_empty() && self.buckets.len() > 1 {
            self.unlink(target, scope);
        }
        true
    }

    /// Locate the bucket that should receive `id`, and the node reached at
    /// each rank on the way down (the head sentinel where nothing was passed).
    pub(crate) fn fit(&self, id: Snowflake, records: &Records<K>) -> (BucketId, Vec<Link>) {
        let ranks = self.head.len();
        let mut path = vec![Link::Head; ranks];
        let mut cursor = Link::Head;
        for rank in (0..ranks).rev() {
            while let Some(next) = self.next_of(cursor, rank) {
                match bucket_ref(&self.buckets, next).min() {
                    Some(min) if order(&self.comparator, records, min, id) == Ordering::Less => {
                        cursor = Link::Bucket(next);
                    }
                    _ => break,
                }
            }
            path[rank] = cursor;
        }
        let target = match cursor {
            Link::Bucket(b) => b,
            Link::Head => self.first(),
        };
        if let Some(p) = path.first_mut() {
            *p = Link::Bucket(target);
        }
        (target, path)
    }

    /// True when `id` still sits between its in-order neighbours: the
    /// adjacent members of its bucket, or the neighbouring buckets' bounds
    /// at either end.
    pub(crate) fn holds_in_order(&self, bucket: BucketId, id: Snowflake, records: &Records<K>) -> bool {
        let Some(b) = self.buckets.get(&bucket) else {
            return true;
        };
        let Some(at) = b.position(id) else {
            return true;
        };
        let lower = match at {
            0 => b.prev().and_then(|p| bucket_ref(&self.buckets, p).max()),
            _ => Some(b.members[at - 1]),
        };
        let upper = b
            .members
            .get(at + 1)
            .copied()
            .or_else(|| b.next().and_then(|n| bucket_ref(&self.buckets, n).min()));
        let cmp = |x, y| order(&self.comparator, records, x, y);
        lower.map_or(true, |l| cmp(l, id) != Ordering::Greater)
            && upper.map_or(true, |u| cmp(id, u) != Ordering::Greater)
    }

    /// Move the trailing half of `lower` into a new bucket spliced in after it.
    fn split(&mut self, lower: BucketId, path: &[Link], scope: &mut Scope<'_, K>) {
        let upper = self.create_bucket(scope.graph, scope.bucket_ids);
        let max = self.config.max_bucket_size;

        let (lower_node, lower_trap, moved) = {
            let b = bucket_mut(&mut self.buckets, lower);
            let keep = b.len() - (b.len() / 2).min(max);
            let moved = b.members.split_off(keep);
            (b.node(), b.trap(), moved)
        };
        let snapshots: Vec<Snapshot> = moved
            .iter()
            .map(|m| record(scope.records, *m).snapshot())
            .collect();

        scope.outbox.push(
            lower_node,
            Signal::shift(Shift {
                bucket: lower,
                add: Vec::new(),
                remove: moved.clone(),
            }),
        );
        let upper_bucket = bucket_mut(&mut self.buckets, upper);
        let (upper_node, upper_trap) = (upper_bucket.node(), upper_bucket.trap());
        upper_bucket.members = moved.clone();
        scope.outbox.push(
            upper_node,
            Signal::shift(Shift {
                bucket: upper,
                add: snapshots,
                remove: Vec::new(),
            }),
        );

        for m in &moved {
            let node = record(scope.records, *m).node();
            scope.graph.remove_source(lower_trap, node);
            scope.graph.add_source(upper_trap, node);
            self.index.insert(*m, upper);
        }

        self.splice(lower, upper, path);
        self.relink(lower, scope);
        self.relink(upper, scope);
        if let Some(succ) = bucket_ref(&self.buckets, upper).next() {
            self.relink(succ, scope);
        }
        log::debug!(
            "set {} split bucket {lower} -> {upper} ({} moved, {} ranks)",
            self.id,
            moved.len(),
            bucket_ref(&self.buckets, upper).ranks()
        );
    }

    /// Link `upper` right after `lower` at rank 0, then one rank further up
    /// per successful promotion. Promoting past the top grows a new rank.
    fn splice(&mut self, lower: BucketId, upper: BucketId, path: &[Link]) {
        let mut rank = 0;
        loop {
            if rank == self.head.len() {
                self.head.push(Some(upper));
                let b = bucket_mut(&mut self.buckets, upper);
                b.next.push(None);
                b.prev.push(Link::Head);
                log::trace!("set {} grew to {} ranks", self.id, self.head.len());
                break;
            }

            let mut pred = path.get(rank).copied().unwrap_or(Link::Head);
            if self.next_of(pred, rank) == Some(lower) {
                pred = Link::Bucket(lower);
            }
            let succ = self.next_of(pred, rank);
            self.set_next(pred, rank, Some(upper));
            let b = bucket_mut(&mut self.buckets, upper);
            b.next.push(succ);
            b.prev.push(pred);
            if let Some(s) = succ {
                bucket_mut(&mut self.buckets, s).prev[rank] = Link::Bucket(upper);
            }

            if !self.promotion.promote(self.config.promotion_probability) {
                break;
            }
            rank += 1;
        }
    }

    /// Splice an empty bucket out of every rank. Its nodes are queued for
    /// destruction after dispatch, so shifts already queued from it still
    /// go out.
    ///
    /// # Panics
    ///
    /// Panics if the bucket still has members.
    pub(crate) fn unlink(&mut self, target: BucketId, scope: &mut Scope<'_, K>) {
        assert!(
            bucket_ref(&self.buckets, target).is_empty(),
            "cannot unlink non-empty Bucket {target}"
        );
        let Some(bucket) = self.buckets.remove(&target) else {
            return;
        };
        for (rank, (succ, pred)) in bucket.next.iter().zip(&bucket.prev).enumerate() {
            self.set_next(*pred, rank, *succ);
            if let Some(s) = succ {
                bucket_mut(&mut self.buckets, *s).prev[rank] = *pred;
            }
        }
        while matches!(self.head.last(), Some(None)) {
            self.head.pop();
        }
        for neighbour in [bucket.prev(), bucket.next()].into_iter().flatten() {
            self.relink(neighbour, scope);
        }
        scope.outbox.doomed.extend([bucket.trap(), bucket.node()]);
        log::trace!("set {} unlinked bucket {target} ({} ranks left)", self.id, self.head.len());
    }

    fn create_bucket(&mut self, graph: &mut SignalGraph, bucket_ids: &mut u64) -> BucketId {
        *bucket_ids += 1;
        let id = BucketId(*bucket_ids);
        let node = graph.insert(Role::Relay);
        let trap = graph.insert(Role::Trap {
            set: self.id,
            bucket: id,
        });
        graph.add_source(node, trap);
        graph.add_source(self.node, node);
        self.buckets.insert(id, Bucket::new(id, node, trap));
        id
    }

    /// Queue the current rank-0 neighbours of `bucket` from its node.
    fn relink(&self, bucket: BucketId, scope: &mut Scope<'_, K>) {
        let b = bucket_ref(&self.buckets, bucket);
        scope.outbox.push(
            b.node(),
            Signal::relink(Relink {
                bucket,
                prev: b.prev(),
                next: b.next(),
            }),
        );
    }

    fn first(&self) -> BucketId {
        self.head
            .first()
            .copied()
            .flatten()
            .unwrap_or_else(|| panic!("set {} has no rank-0 bucket", self.id))
    }

    fn next_of(&self, link: Link, rank: usize) -> Option<BucketId> {
        match link {
            Link::Head => self.head.get(rank).copied().flatten(),
            Link::Bucket(b) => bucket_ref(&self.buckets, b)
                .next
                .get(rank)
                .copied()
                .flatten(),
        }
    }

    fn set_next(&mut self, link: Link, rank: usize, to: Option<BucketId>) {
        match link {
            Link::Head => self.head[rank] = to,
            Link::Bucket(b) => bucket_mut(&mut self.buckets, b).next[rank] = to,
        }
    }
}

fn order<K>(comparator: &Comparator<K>, records: &Records<K>, a: Snowflake, b: Snowflake) -> Ordering {
    comparator(record(records, a), record(records, b))
}

fn record<K>(records: &Records<K>, id: Snowflake) -> &Replicable<K> {
    records
        .get(&id)
        .unwrap_or_else(|| panic!("record {id} is indexed but not live"))
}

fn bucket_ref(buckets: &FxHashMap<BucketId, Bucket>, id: BucketId) -> &Bucket {
    buckets
        .get(&id)
        .unwrap_or_else(|| panic!("bucket {id} is linked but not owned"))
}

fn bucket_mut(buckets: &mut FxHashMap<BucketId, Bucket>, id: BucketId) -> &mut Bucket {
    buckets
        .get_mut(&id)
        .unwrap_or_else(|| panic!("bucket {id} is linked but not owned"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::promotion::{RandomPromotion, ScriptedPromotion};
    use crate::signal::{Primitive, Properties};

    /// Test harness: a set plus the state a hub would own.
    pub(crate) struct Fixture {
        pub set: OrderedSet<()>,
        pub records: Records<()>,
        pub graph: SignalGraph,
        pub bucket_ids: u64,
        pub outbox: Outbox<()>,
    }

    pub(crate) fn by_key(a: &Replicable<()>, b: &Replicable<()>) -> Ordering {
        let ka = a.get_f64("key").unwrap_or_default();
        let kb = b.get_f64("key").unwrap_or_default();
        ka.total_cmp(&kb).then(a.id().cmp(&b.id()))
    }

    impl Fixture {
        pub fn new(max_bucket_size: usize, promotion: Box<dyn Promotion>) -> Self {
            let mut graph = SignalGraph::new();
            let mut bucket_ids = 0;
            let config = SetConfig {
                max_bucket_size,
                ..SetConfig::default()
            };
            let set = OrderedSet::new(
                SetId(0),
                Box::new(by_key),
                config,
                promotion,
                &mut graph,
                &mut bucket_ids,
            );
            Self {
                set,
                records: Records::default(),
                graph,
                bucket_ids,
                outbox: Outbox::new(),
            }
        }

        pub fn record(&mut self, id: u64, key: f64) -> Snowflake {
            let id = Snowflake::from_raw(id);
            let node = self.graph.insert(Role::Relay);
            let mut data = Properties::new();
            data.insert("key".into(), Primitive::Number(key));
            self.records.insert(id, Replicable::new(id, (), node, data));
            id
        }

        pub fn with_scope<R>(
            &mut self,
            f: impl FnOnce(&mut OrderedSet<()>, &mut Scope<'_, ()>) -> R,
        ) -> R {
            let mut scope = Scope {
                records: &self.records,
                graph: &mut self.graph,
                bucket_ids: &mut self.bucket_ids,
                outbox: &mut self.outbox,
            };
            f(&mut self.set, &mut scope)
        }

        pub fn add(&mut self, id: Snowflake) -> bool {
            self.with_scope(|s, scope| s.add(id, scope))
        }

        pub fn remove(&mut self, id: Snowflake) -> bool {
            self.with_scope(|s, scope| s.remove(id, scope))
        }

        pub fn insert(&mut self, id: u64, key: f64) -> Snowflake {
            let id = self.record(id, key);
            self.add(id);
            id
        }

        pub fn keys(&self) -> Vec<f64> {
            self.set
                .iter()
                .map(|id| self.records[&id].get_f64("key").unwrap_or_default())
                .collect()
        }

        /// Stand-in for hub dispatch: every queued signal must still have a
        /// live origin, then the doomed nodes go.
        pub fn drain(&mut self) -> Vec<Signal<()>> {
            let mut out = Vec::new();
            for (origin, signal) in self.outbox.signals.drain(..) {
                assert!(self.graph.contains(origin), "signal queued from dead node {origin:?}");
                out.push(signal);
            }
            for node in self.outbox.doomed.drain(..) {
                assert!(self.graph.destroy(node), "node {node:?} doomed twice");
            }
            out
        }

        pub fn shifts(&mut self) -> Vec<Shift> {
            self.drain().iter().filter_map(|s| s.as_shift().cloned()).collect()
        }

        pub fn links(&mut self) -> Vec<Relink> {
            self.drain().iter().filter_map(|s| s.as_relink().cloned()).collect()
        }

        /// Sort order, size bound, disjoint ranges, index agreement,
        /// link symmetry, live signal origins and graph consistency.
        pub fn assert_invariants(&self) {
            let set = &self.set;
            for (origin, _) in &self.outbox.signals {
                assert!(self.graph.contains(*origin), "signal queued from dead node {origin:?}");
            }
            for b in set.buckets.values() {
                assert!(!self.outbox.doomed.contains(&b.node()), "live bucket {} doomed", b.id());
            }
            let cmp = |a, b| order(&set.comparator, &self.records, a, b);
            let mut previous_max: Option<Snowflake> = None;
            let mut seen = 0;
            for b in set.buckets() {
                assert!(b.len() <= set.config.max_bucket_size, "bucket {} oversized", b.id());
                for pair in b.members().windows(2) {
                    assert_ne!(cmp(pair[0], pair[1]), Ordering::Greater, "bucket {} unsorted", b.id());
                }
                if let (Some(prev), Some(min)) = (previous_max, b.min()) {
                    assert_ne!(cmp(prev, min), Ordering::Greater, "bucket {} overlaps", b.id());
                }
                for m in b.members() {
                    assert_eq!(set.bucket_of(*m), Some(b.id()));
                    assert!(self.graph.has_edge(b.trap(), self.records[m].node()));
                }
                if set.buckets.len() > 1 {
                    assert!(!b.is_empty(), "empty bucket {} left linked", b.id());
                }
                seen += b.len();
                previous_max = b.max().or(previous_max);
            }
            assert_eq!(seen, set.len());
            assert_eq!(set.buckets().count(), set.buckets.len());
            assert_eq!(set.ranks(), set.head.len());
            assert!(matches!(set.head.last(), Some(Some(_))));
            for rank in 0..set.ranks() {
                let mut pred = Link::Head;
                for b in set.chain(rank) {
                    assert_eq!(set.buckets[&b].prev[rank], pred);
                    pred = Link::Bucket(b);
                }
            }
            assert!(self.graph.is_consistent());
        }
    }

    #[test]
    fn test_scenario_a_small_buckets() {
        let mut f = Fixture::new(2, Box::new(ScriptedPromotion::default()));
        f.insert(1, 5.0);
        f.insert(2, 3.0);
        assert_eq!(f.set.buckets().count(), 1);
        f.insert(3, 1.0);
        assert_eq!(f.set.buckets().count(), 2);
        f.assert_invariants();
        f.insert(4, 4.0);
        f.assert_invariants();
        assert_eq!(f.keys(), vec![1.0, 3.0, 4.0, 5.0]);
        assert!(f.set.buckets().all(|b| b.len() <= 2));
    }

    #[test]
    fn test_scenario_b_one_split_at_65() {
        let mut f = Fixture::new(64, Box::new(ScriptedPromotion::default()));
        for i in 0..64 {
            f.insert(i + 1, i as f64);
        }
        assert_eq!(f.set.buckets().count(), 1);
        f.shifts();

        f.insert(65, 64.0);
        let shifts = f.shifts();
        // add into the full bucket, then the split pair
        assert_eq!(shifts.len(), 3);
        assert_eq!(shifts[1].remove.len(), 32);
        assert_eq!(shifts[2].add.len(), 32);

        let buckets: Vec<&Bucket> = f.set.buckets().collect();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].len(), 33);
        assert_eq!(buckets[1].len(), 32);
        assert_eq!(buckets[0].next(), Some(buckets[1].id()));
        assert_eq!(buckets[1].prev(), Some(buckets[0].id()));
        assert_eq!(buckets[1].next(), None);
        f.assert_invariants();
    }

    #[test]
    fn test_split_between_existing_neighbours() {
        let mut f = Fixture::new(2, Box::new(ScriptedPromotion::default()));
        for (i, key) in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0].into_iter().enumerate() {
            f.insert(i as u64 + 1, key);
        }
        let before: Vec<BucketId> = f.set.chain(0);
        f.insert(7, 25.0);
        f.insert(8, 26.0);
        f.assert_invariants();
        let after = f.set.chain(0);
        assert!(after.len() > before.len());
        assert_eq!(after.first(), before.first());
        assert_eq!(after.last(), before.last());
        assert_eq!(f.keys(), vec![10.0, 20.0, 25.0, 26.0, 30.0, 40.0, 50.0, 60.0]);
    }

    #[test]
    fn test_promotion_grows_ranks() {
        // First split promotes through the only rank: a second rank appears.
        let mut f = Fixture::new(2, Box::new(ScriptedPromotion::new([true])));
        f.insert(1, 1.0);
        f.insert(2, 2.0);
        f.insert(3, 3.0);
        assert_eq!(f.set.ranks(), 2);
        let upper = f.set.bucket_of(Snowflake::from_raw(3)).unwrap();
        assert_eq!(f.set.chain(1), vec![upper]);
        assert_eq!(f.set.bucket(upper).unwrap().ranks(), 2);
        f.assert_invariants();
    }

    #[test]
    fn test_scripted_chain_shape() {
        // split 1 promotes into a new top rank, split 2 stays at rank 0
        let mut f = Fixture::new(2, Box::new(ScriptedPromotion::new([true, false])));
        for i in 1..=3 {
            f.insert(i, i as f64);
        }
        for i in 4..=5 {
            f.insert(i, i as f64);
        }
        f.assert_invariants();
        assert_eq!(f.set.ranks(), 2);
        assert_eq!(f.set.chain(0).len(), 3);
        assert_eq!(f.set.chain(1).len(), 1);
    }

    #[test]
    fn test_fit_starts_from_head() {
        // The top-rank first bucket is not the overall first bucket; a key
        // smaller than everything must still land in the first bucket.
        let mut f = Fixture::new(2, Box::new(ScriptedPromotion::new([true])));
        for i in 1..=3 {
            f.insert(i * 10, i as f64 * 10.0);
        }
        let first = f.set.chain(0)[0];
        let smallest = f.record(99, 0.5);
        let (target, path) = f.set.fit(smallest, &f.records);
        assert_eq!(target, first);
        assert_eq!(path[0], Link::Bucket(first));
        assert_eq!(path[1], Link::Head);
    }

    #[test]
    fn test_add_existing_is_noop() {
        let mut f = Fixture::new(4, Box::new(ScriptedPromotion::default()));
        let id = f.insert(1, 1.0);
        f.shifts();
        assert!(!f.add(id));
        assert!(f.shifts().is_empty());
        assert_eq!(f.set.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut f = Fixture::new(4, Box::new(ScriptedPromotion::default()));
        assert!(!f.remove(Snowflake::from_raw(404)));
        assert!(f.shifts().is_empty());
    }

    #[test]
    fn test_round_trip_leaves_only_initial_bucket() {
        let mut f = Fixture::new(4, Box::new(ScriptedPromotion::default()));
        let id = f.insert(1, 1.0);
        assert!(f.remove(id));
        assert!(!f.set.contains(id));
        assert_eq!(f.set.buckets().count(), 1);
        assert!(f.set.buckets().all(Bucket::is_empty));
        f.assert_invariants();

        let shifts = f.shifts();
        assert_eq!(shifts.len(), 2);
        assert_eq!(shifts[1].remove, vec![id]);
    }

    #[test]
    fn test_emptied_bucket_is_unlinked() {
        let mut f = Fixture::new(2, Box::new(ScriptedPromotion::new([true, true, true])));
        let ids: Vec<Snowflake> = (1..=6).map(|i| f.insert(i, i as f64)).collect();
        let nodes_before = f.graph.len();
        let victim = f.set.bucket_of(ids[5]).unwrap();
        let mates: Vec<Snowflake> = f.set.bucket(victim).unwrap().members().to_vec();
        for m in &mates {
            f.remove(*m);
        }
        assert!(f.set.bucket(victim).is_none());
        f.assert_invariants();
        // nodes outlive the removal until the queued shifts are dispatched
        assert_eq!(f.graph.len(), nodes_before);
        let shifts = f.shifts();
        assert_eq!(shifts.last().map(|s| s.bucket), Some(victim));
        assert_eq!(f.graph.len(), nodes_before - 2);
        f.assert_invariants();
    }

    fn link(bucket: BucketId, prev: Option<BucketId>, next: Option<BucketId>) -> Relink {
        Relink { bucket, prev, next }
    }

    #[test]
    fn test_split_relinks_neighbours() {
        let mut f = Fixture::new(2, Box::new(ScriptedPromotion::default()));
        let one = f.insert(1, 1.0);
        f.insert(2, 2.0);
        f.drain();
        let three = f.insert(3, 3.0);
        let (b1, b2) = (f.set.bucket_of(one).unwrap(), f.set.bucket_of(three).unwrap());
        assert_eq!(
            f.links(),
            vec![
                link(b1, None, Some(b2)),
                link(b2, Some(b1), None),
            ]
        );

        // lands in b1 and splits it again: the new bucket sits between b1 and b2
        let middle = f.insert(4, 1.5);
        let two = Snowflake::from_raw(2);
        let b3 = f.set.bucket_of(two).unwrap();
        assert_eq!(f.set.bucket_of(middle), Some(b1));
        assert_eq!(
            f.links(),
            vec![
                link(b1, None, Some(b3)),
                link(b3, Some(b1), Some(b2)),
                link(b2, Some(b3), None),
            ]
        );
        f.assert_invariants();
    }

    #[test]
    fn test_unlink_relinks_neighbours() {
        let mut f = Fixture::new(2, Box::new(ScriptedPromotion::default()));
        let one = f.insert(1, 1.0);
        let two = f.insert(2, 2.0);
        let three = f.insert(3, 3.0);
        f.insert(4, 1.5);
        let (b1, b2, b3) = (
            f.set.bucket_of(one).unwrap(),
            f.set.bucket_of(three).unwrap(),
            f.set.bucket_of(two).unwrap(),
        );
        f.drain();

        assert!(f.remove(two));
        f.assert_invariants();
        let signals = f.drain();
        assert_eq!(signals.len(), 3);
        assert_eq!(
            signals[0].as_shift().map(|s| (s.bucket, s.remove.clone())),
            Some((b3, vec![two]))
        );
        let links: Vec<Relink> = signals.iter().filter_map(|s| s.as_relink().cloned()).collect();
        assert_eq!(
            links,
            vec![
                link(b1, None, Some(b2)),
                link(b2, Some(b1), None),
            ]
        );
        assert_eq!(f.set.chain(0), vec![b1, b2]);

        // emptying the first bucket relinks only its successor
        f.remove(one);
        f.remove(Snowflake::from_raw(4));
        assert_eq!(f.links(), vec![link(b2, None, None)]);
        f.assert_invariants();
    }

    #[test]
    fn test_remove_everything_shrinks_ranks() {
        let mut f = Fixture::new(2, Box::new(RandomPromotion::with_seed(11)));
        let ids: Vec<Snowflake> = (1..=40).map(|i| f.insert(i, (i * 7 % 40) as f64)).collect();
        f.assert_invariants();
        for id in ids {
            f.remove(id);
            f.assert_invariants();
            f.drain();
        }
        assert!(f.set.is_empty());
        assert_eq!(f.set.buckets().count(), 1);
        assert_eq!(f.set.ranks(), f.set.head.len());
    }

    #[test]
    #[should_panic(expected = "cannot unlink non-empty Bucket")]
    fn test_unlink_non_empty_is_fatal() {
        let mut f = Fixture::new(4, Box::new(ScriptedPromotion::default()));
        let id = f.insert(1, 1.0);
        let bucket = f.set.bucket_of(id).unwrap();
        f.with_scope(|s, scope| s.unlink(bucket, scope));
    }

    #[test]
    fn test_random_workload_keeps_invariants() {
        let mut f = Fixture::new(4, Box::new(RandomPromotion::with_seed(3)));
        let mut rng = fastrand::Rng::with_seed(99);
        let mut live = Vec::new();
        for n in 1..=400u64 {
            if !live.is_empty() && rng.u8(..) < 80 {
                let at = rng.usize(..live.len());
                let id = live.swap_remove(at);
                f.remove(id);
            } else {
                live.push(f.insert(n, rng.u32(..1000) as f64));
            }
            f.assert_invariants();
            f.drain();
        }
        let keys = f.keys();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(keys.len(), live.len());
    }

    #[test]
    fn test_duplicate_keys_stay_disjoint() {
        let mut f = Fixture::new(2, Box::new(RandomPromotion::with_seed(5)));
        for i in 1..=20 {
            f.insert(i, 7.0);
        }
        f.insert(21, 1.0);
        f.insert(22, 9.0);
        f.assert_invariants();
        assert_eq!(f.keys().first(), Some(&1.0));
        assert_eq!(f.keys().last(), Some(&9.0));
    }

    #[test]
    fn test_holds_in_order_checks_neighbours() {
        let mut f = Fixture::new(8, Box::new(ScriptedPromotion::default()));
        let a = f.insert(1, 1.0);
        let b = f.insert(2, 5.0);
        f.insert(3, 9.0);
        let bucket = f.set.bucket_of(b).unwrap();
        assert!(f.set.holds_in_order(bucket, b, &f.records));

        // first member moved past the second one: still inside [min, max]
        // of the bucket as a whole, but out of order
        if let Some(r) = f.records.get_mut(&a) {
            r.write("key", Primitive::Number(6.0)).unwrap();
        }
        assert!(!f.set.holds_in_order(bucket, a, &f.records));
    }
}
