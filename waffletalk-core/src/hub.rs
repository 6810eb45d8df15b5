//! Hub: owns the signal graph and everything wired into it.
//!
//! Emission is a synchronous depth-first fan-out. Each emitted signal carries
//! its own visited set, so a node (and in particular a terminal) handles a
//! given signal at most once however many paths lead to it. A Mutation Trap
//! that detects a broken order repairs the set in-line; the resulting shifts
//! are emitted before the triggering write returns.
//!
//! Structural changes queue their signals in an outbox. Nodes of
//! unlinked buckets are destroyed only after that outbox is dispatched.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{DeliveryError, ReplicaError};
use crate::graph::{NodeId, Role, SignalGraph};
use crate::identity::Snowflake;
use crate::ordered_set::{Comparator, OrderedSet, Outbox, Records, Scope, SetConfig, SetId};
use crate::promotion::{Promotion, RandomPromotion};
use crate::replicable::Replicable;
use crate::signal::{BucketId, Primitive, Properties, Shift, Signal, SignalBody};

/// A delivery sink at the edge of the graph.
pub trait Terminal<K>: Send {
    fn deliver(&mut self, signal: &Signal<K>) -> Result<(), DeliveryError>;
}

pub struct Hub<K> {
    graph: SignalGraph,
    records: Records<K>,
    sets: Vec<OrderedSet<K>>,
    terminals: FxHashMap<NodeId, Box<dyn Terminal<K>>>,
    /// Set each placed record belongs to. A record is in at most one set.
    placements: FxHashMap<Snowflake, SetId>,
    next_bucket: u64,
}

impl<K: Copy> Default for Hub<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy> Hub<K> {
    pub fn new() -> Self {
        Self {
            graph: SignalGraph::new(),
            records: Records::default(),
            sets: Vec::new(),
            terminals: FxHashMap::default(),
            placements: FxHashMap::default(),
            next_bucket: 0,
        }
    }

    pub fn graph(&self) -> &SignalGraph {
        &self.graph
    }

    // ---- records ----

    /// Register a record. Its property keys become its fixed schema.
    pub fn insert_record(
        &mut self,
        id: Snowflake,
        kind: K,
        data: Properties,
    ) -> Result<NodeId, ReplicaError> {
        if self.records.contains_key(&id) {
            return Err(ReplicaError::DuplicateRecord(id));
        }
        let node = self.graph.insert(Role::Relay);
        self.records.insert(id, Replicable::new(id, kind, node, data));
        Ok(node)
    }

    /// Drop a record: leave its set (emitting the remove shift), then tear
    /// down its node.
    pub fn remove_record(&mut self, id: Snowflake) -> Result<Replicable<K>, ReplicaError> {
        if !self.records.contains_key(&id) {
            return Err(ReplicaError::UnknownRecord(id));
        }
        if let Some(set) = self.placements.get(&id).copied() {
            self.remove(set, id)?;
        }
        let record = self
            .records
            .remove(&id)
            .ok_or(ReplicaError::UnknownRecord(id))?;
        self.graph.destroy(record.node());
        Ok(record)
    }

    pub fn record(&self, id: Snowflake) -> Option<&Replicable<K>> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &Replicable<K>> + '_ {
        self.records.values()
    }

    /// Apply a property write, then emit the mutation from the record's node.
    pub fn write(
        &mut self,
        id: Snowflake,
        property: &str,
        value: impl Into<Primitive>,
    ) -> Result<(), ReplicaError> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(ReplicaError::UnknownRecord(id))?;
        let origin = record.node();
        let mutation = record.write(property, value.into())?;
        self.emit(origin, &Signal::mutation(mutation));
        Ok(())
    }

    /// # Panics
    ///
    /// Always, once the record is found: schemas are fixed.
    pub fn delete_property(&mut self, id: Snowflake, property: &str) -> Result<(), ReplicaError> {
        self.records
            .get_mut(&id)
            .ok_or(ReplicaError::UnknownRecord(id))?
            .delete(property)
    }

    // ---- ordered sets ----

    pub fn create_set(&mut self, comparator: Comparator<K>, config: SetConfig) -> SetId {
        self.create_set_with_promotion(comparator, config, Box::new(RandomPromotion::new()))
    }

    pub fn create_set_with_promotion(
        &mut self,
        comparator: Comparator<K>,
        config: SetConfig,
        promotion: Box<dyn Promotion>,
    ) -> SetId {
        let id = SetId(self.sets.len() as u32);
        let set = OrderedSet::new(
            id,
            comparator,
            config,
            promotion,
            &mut self.graph,
            &mut self.next_bucket,
        );
        self.sets.push(set);
        id
    }

    pub fn set(&self, id: SetId) -> Option<&OrderedSet<K>> {
        self.sets.get(id.index())
    }

    /// Insert a live record into a set. `Ok(false)` if it is already there.
    pub fn add(&mut self, set: SetId, id: Snowflake) -> Result<bool, ReplicaError> {
        if !self.records.contains_key(&id) {
            return Err(ReplicaError::UnknownRecord(id));
        }
        match self.placements.get(&id) {
            Some(placed) if *placed == set => return Ok(false),
            Some(placed) => {
                return Err(ReplicaError::AlreadyPlaced {
                    id,
                    set: *placed,
                })
            }
            None => {}
        }
        let mut outbox = Outbox::new();
        let added = self.with_scope(set, &mut outbox, |s, scope| s.add(id, scope))?;
        if added {
            self.placements.insert(id, set);
        }
        self.dispatch(outbox);
        Ok(added)
    }

    /// Take a record out of a set. `Ok(false)` if it is not a member.
    pub fn remove(&mut self, set: SetId, id: Snowflake) -> Result<bool, ReplicaError> {
        let mut outbox = Outbox::new();
        let removed = self.with_scope(set, &mut outbox, |s, scope| s.remove(id, scope))?;
        if removed {
            self.placements.remove(&id);
        }
        self.dispatch(outbox);
        Ok(removed)
    }

    /// Member lookup through the set's id index.
    pub fn get(&self, set: SetId, id: Snowflake) -> Option<&Replicable<K>> {
        self.set(set)
            .filter(|s| s.contains(id))
            .and_then(|_| self.records.get(&id))
    }

    /// Set a record has been placed in.
    pub fn placement(&self, id: Snowflake) -> Option<SetId> {
        self.placements.get(&id).copied()
    }

    // ---- terminals and wiring ----

    pub fn attach_terminal(&mut self, terminal: Box<dyn Terminal<K>>) -> NodeId {
        let node = self.graph.insert(Role::Terminal);
        self.terminals.insert(node, terminal);
        node
    }

    /// Destroy the terminal's node (and every edge into it).
    pub fn detach_terminal(&mut self, node: NodeId) -> Option<Box<dyn Terminal<K>>> {
        let terminal = self.terminals.remove(&node)?;
        self.graph.destroy(node);
        Some(terminal)
    }

    /// Wire `source` into `sink`. Idempotent.
    pub fn wire(&mut self, sink: NodeId, source: NodeId) -> Result<(), ReplicaError> {
        for node in [sink, source] {
            if !self.graph.contains(node) {
                return Err(ReplicaError::UnknownNode(node));
            }
        }
        self.graph.add_source(sink, source);
        Ok(())
    }

    pub fn unwire(&mut self, sink: NodeId, source: NodeId) {
        self.graph.remove_source(sink, source);
    }

    /// Wire `sink` to the set's relay: it sees shifts and forwarded
    /// mutations from every current and future bucket of the set.
    pub fn subscribe(&mut self, set: SetId, sink: NodeId) -> Result<(), ReplicaError> {
        let relay = self.set(set).ok_or(ReplicaError::UnknownSet(set))?.node();
        self.wire(sink, relay)
    }

    pub fn unsubscribe(&mut self, set: SetId, sink: NodeId) -> Result<(), ReplicaError> {
        let relay = self.set(set).ok_or(ReplicaError::UnknownSet(set))?.node();
        self.unwire(sink, relay);
        Ok(())
    }

    /// Deliver the current content of a set to one terminal, one add-shift
    /// per non-empty bucket in chain order. Returns the number of shifts.
    pub fn replay(&mut self, set: SetId, terminal: NodeId) -> Result<usize, ReplicaError> {
        let s = self.sets.get(set.index()).ok_or(ReplicaError::UnknownSet(set))?;
        let shifts: Vec<Signal<K>> = s
            .buckets()
            .filter(|b| !b.is_empty())
            .map(|b| {
                Signal::shift(Shift {
                    bucket: b.id(),
                    add: b
                        .members()
                        .iter()
                        .filter_map(|m| self.records.get(m))
                        .map(Replicable::snapshot)
                        .collect(),
                    remove: Vec::new(),
                })
            })
            .collect();
        let sink = self
            .terminals
            .get_mut(&terminal)
            .ok_or(ReplicaError::UnknownNode(terminal))?;
        for signal in &shifts {
            if let Err(e) = sink.deliver(signal) {
                log::warn!("replay of set {set} to {terminal:?} failed: {e}");
                break;
            }
        }
        Ok(shifts.len())
    }

    // ---- dispatch ----

    fn with_scope<R>(
        &mut self,
        set: SetId,
        outbox: &mut Outbox<K>,
        f: impl FnOnce(&mut OrderedSet<K>, &mut Scope<'_, K>) -> R,
    ) -> Result<R, ReplicaError> {
        let s = self
            .sets
            .get_mut(set.index())
            .ok_or(ReplicaError::UnknownSet(set))?;
        let mut scope = Scope {
            records: &self.records,
            graph: &mut self.graph,
            bucket_ids: &mut self.next_bucket,
            outbox,
        };
        Ok(f(s, &mut scope))
    }

    fn dispatch(&mut self, outbox: Outbox<K>) {
        for (origin, signal) in outbox.signals {
            debug_assert!(self.graph.contains(origin), "signal queued from dead node {origin:?}");
            self.emit(origin, &signal);
        }
        for node in outbox.doomed {
            self.graph.destroy(node);
        }
    }

    fn emit(&mut self, origin: NodeId, signal: &Signal<K>) {
        let mut visited = FxHashSet::default();
        visited.insert(origin);
        self.fan_out(origin, signal, &mut visited);
    }

    fn fan_out(&mut self, from: NodeId, signal: &Signal<K>, visited: &mut FxHashSet<NodeId>) {
        for sink in self.graph.sinks(from) {
            self.handle(sink, signal, visited);
        }
    }

    fn handle(&mut self, node: NodeId, signal: &Signal<K>, visited: &mut FxHashSet<NodeId>) {
        if !visited.insert(node) {
            return;
        }
        // Nodes destroyed by a repair earlier in this fan-out resolve to None.
        match self.graph.role(node) {
            Some(Role::Relay) => self.fan_out(node, signal, visited),
            Some(Role::Trap { set, bucket }) => self.trap(node, set, bucket, signal, visited),
            Some(Role::Terminal) => self.deliver(node, signal),
            None => {}
        }
    }

    fn trap(
        &mut self,
        node: NodeId,
        set: SetId,
        bucket: BucketId,
        signal: &Signal<K>,
        visited: &mut FxHashSet<NodeId>,
    ) {
        let SignalBody::Mutation(mutation) = signal.body() else {
            return;
        };
        let id = mutation.id;
        let Some(s) = self.sets.get(set.index()) else {
            return;
        };
        if s.bucket_of(id) != Some(bucket) {
            return;
        }
        if s.holds_in_order(bucket, id, &self.records) {
            self.fan_out(node, signal, visited);
            return;
        }

        log::debug!("set {set}: record {id} left bucket {bucket} order, repairing");
        let mut outbox = Outbox::new();
        let repaired = self.with_scope(set, &mut outbox, |s, scope| {
            s.remove(id, scope);
            s.add(id, scope);
        });
        if let Err(e) = repaired {
            log::error!("repair of record {id} failed: {e}");
        }
        self.dispatch(outbox);
    }

    fn deliver(&mut self, node: NodeId, signal: &Signal<K>) {
        let Some(terminal) = self.terminals.get_mut(&node) else {
            return;
        };
        if let Err(e) = terminal.deliver(signal) {
            log::warn!("delivery to terminal {node:?} failed: {e}");
        }
    }
}
