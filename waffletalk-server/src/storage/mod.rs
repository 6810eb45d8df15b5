//! Persistent storage for domain records.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐   insert (immediate)   ┌──────────────┐
//! │ World       │ ─────────────────────► │ RecordStore  │
//! │             │                        │ (RocksDB)    │
//! └──────┬──────┘                        └──────▲───────┘
//!        │ mutation signals                     │ WriteBatch
//!        ▼                                      │
//! ┌─────────────┐        flush task      ┌──────┴───────┐
//! │ Journal     │ ─────────────────────► │ apply(ops)   │
//! │ (terminal)  │                        │              │
//! └─────────────┘                        └──────────────┘
//! ```

pub mod credential;
pub mod journal;
pub mod rocks;

pub use credential::Credential;
pub use journal::{Journal, WriteOp};
pub use rocks::{RecordStore, StoreConfig};
