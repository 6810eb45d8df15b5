//! Replicable records: immutable identity plus a fixed-schema property bag.
//!
//! A record is also a node in the signal graph. Writes go through
//! [`Hub::write`](crate::Hub::write), which applies the value and then emits
//! the resulting mutation from the record's node.

use crate::error::ReplicaError;
use crate::graph::NodeId;
use crate::identity::Snowflake;
use crate::signal::{Mutation, Primitive, Properties, Snapshot};

#[derive(Debug, Clone)]
pub struct Replicable<K> {
    id: Snowflake,
    kind: K,
    node: NodeId,
    data: Properties,
}

impl<K: Copy> Replicable<K> {
    pub(crate) fn new(id: Snowflake, kind: K, node: NodeId, data: Properties) -> Self {
        Self {
            id,
            kind,
            node,
            data,
        }
    }

    pub fn id(&self) -> Snowflake {
        self.id
    }

    pub fn kind(&self) -> K {
        self.kind
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn data(&self) -> &Properties {
        &self.data
    }

    pub fn get(&self, property: &str) -> Option<&Primitive> {
        self.data.get(property)
    }

    pub fn get_str(&self, property: &str) -> Option<&str> {
        self.get(property).and_then(Primitive::as_str)
    }

    pub fn get_f64(&self, property: &str) -> Option<f64> {
        self.get(property).and_then(Primitive::as_f64)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id,
            data: self.data.clone(),
        }
    }

    /// Apply a write and describe it as a mutation.
    ///
    /// Only properties present at construction may be written.
    pub(crate) fn write(
        &mut self,
        property: &str,
        value: Primitive,
    ) -> Result<Mutation<K>, ReplicaError> {
        let slot = self
            .data
            .get_mut(property)
            .ok_or_else(|| ReplicaError::UnknownProperty {
                id: self.id,
                property: property.to_string(),
            })?;
        *slot = value.clone();
        Ok(Mutation {
            kind: self.kind,
            id: self.id,
            property: property.to_string(),
            value,
        })
    }

    /// # Panics
    ///
    /// Always. The schema is fixed for the lifetime of the record.
    pub fn delete(&mut self, property: &str) -> ! {
        panic!(
            "properties may not be deleted (record {}, property {property:?})",
            self.id
        )
    }
}
