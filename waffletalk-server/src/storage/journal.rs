//! Write queue between the signal graph and the record store.
//!
//! The journal is a terminal wired into every record node. Mutations it
//! receives are queued and applied by [`Journal::flush`] in one batch, so the
//! flush task never needs the world lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use waffletalk_core::{DeliveryError, Primitive, Signal, SignalBody, Snowflake, Terminal};

use crate::domain::RecordKind;
use crate::error::StoreError;
use crate::storage::RecordStore;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Update {
        kind: RecordKind,
        id: Snowflake,
        property: String,
        value: Primitive,
    },
    Delete {
        kind: RecordKind,
        id: Snowflake,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    queue: Arc<Mutex<Vec<WriteOp>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, op: WriteOp) {
        self.lock().push(op);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Apply every queued op. On failure the ops are put back in front of
    /// anything queued meanwhile.
    pub fn flush(&self, store: &RecordStore) -> Result<usize, StoreError> {
        let ops = std::mem::take(&mut *self.lock());
        if ops.is_empty() {
            return Ok(0);
        }
        match store.apply(&ops) {
            Ok(applied) => {
                log::debug!("flushed {applied} queued writes");
                Ok(applied)
            }
            Err(e) => {
                let mut queue = self.lock();
                let newer = std::mem::replace(&mut *queue, ops);
                queue.extend(newer);
                Err(e)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WriteOp>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Terminal<RecordKind> for Journal {
    fn deliver(&mut self, signal: &Signal<RecordKind>) -> Result<(), DeliveryError> {
        // Bucket layout is rebuilt on recovery, never stored.
        if let SignalBody::Mutation(m) = signal.body() {
            self.push(WriteOp::Update {
                kind: m.kind,
                id: m.id,
                property: m.property.clone(),
                value: m.value.clone(),
            });
        }
        Ok(())
    }
}
