//! # waffletalk-core — Replicated ordered collections
//!
//! Records whose property writes are observable, kept in comparator-sorted
//! sets indexed by a skip list of buckets. Every structural change and every
//! write becomes a signal routed through one graph to the sinks wired into it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ mutation ┌─────────────┐ forward  ┌─────────────┐
//! │ Replicable  │ ───────► │ Trap        │ ───────► │ Bucket      │
//! │ (record)    │          │ (per bucket)│          │ (shifts)    │
//! └──────┬──────┘          └──────┬──────┘          └──────┬──────┘
//!        │                        │ repair                 │
//!        │                        ▼                        ▼
//!        │                 ┌─────────────┐          ┌─────────────┐
//!        │                 │ OrderedSet  │          │ Set relay   │
//!        │                 │ remove+add  │          │             │
//!        │                 └─────────────┘          └──────┬──────┘
//!        ▼                                                 ▼
//! ┌─────────────┐                                   ┌─────────────┐
//! │ Persistence │                                   │ Sessions    │
//! │ (terminal)  │                                   │ (terminals) │
//! └─────────────┘                                   └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`graph`] — Arena of nodes with symmetric adjacency
//! - [`signal`] — Shift / mutation signals and their cached wire form
//! - [`replicable`] — Fixed-schema records
//! - [`bucket`] — One sorted, bounded run of a set
//! - [`ordered_set`] — Skip list of buckets: fit, split, unlink
//! - [`hub`] — Owner of all of the above; synchronous dispatch
//! - [`identity`] — Snowflake tokens

pub mod bucket;
pub mod error;
pub mod graph;
pub mod hub;
pub mod identity;
pub mod ordered_set;
pub mod promotion;
pub mod replicable;
pub mod signal;

pub use bucket::{Bucket, BucketId};
pub use error::{DeliveryError, ReplicaError};
pub use graph::{NodeId, Role, SignalGraph};
pub use hub::{Hub, Terminal};
pub use identity::{Snowflake, SnowflakeGenerator};
pub use ordered_set::{Comparator, OrderedSet, SetConfig, SetId};
pub use promotion::{Promotion, RandomPromotion, ScriptedPromotion};
pub use replicable::Replicable;
pub use signal::{Mutation, Primitive, Properties, Relink, Shift, Signal, SignalBody, Snapshot};
