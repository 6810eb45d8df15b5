use thiserror::Error;

use crate::graph::NodeId;
use crate::identity::Snowflake;
use crate::ordered_set::SetId;

/// Recoverable failures of hub operations.
///
/// Invariant violations (deleting a property, unlinking a non-empty bucket)
/// are not represented here; they panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicaError {
    #[error("unknown record {0}")]
    UnknownRecord(Snowflake),
    #[error("record {0} already exists")]
    DuplicateRecord(Snowflake),
    #[error("unknown ordered set {0}")]
    UnknownSet(SetId),
    #[error("record {id} has no property {property:?}")]
    UnknownProperty { id: Snowflake, property: String },
    #[error("record {id} already belongs to ordered set {set}")]
    AlreadyPlaced { id: Snowflake, set: SetId },
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
}

/// Failure to hand a signal to a terminal's endpoint.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to encode signal: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("endpoint closed")]
    Closed,
}
