//! # waffletalk-server — Chat server over replicated ordered sets
//!
//! Guilds, channels, members and messages live as records in a
//! [`waffletalk_core::Hub`]. Clients subscribe over WebSocket and receive
//! the shifts and mutations of the sets they follow.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ Client      │ ◄────────────────► │ WaffleServer│
//! │             │     JSON frames    │ (per conn)  │
//! └─────────────┘                    └──────┬──────┘
//!                                           │ lock
//!                                           ▼
//!                                    ┌─────────────┐
//!                                    │ World       │
//!                                    │ (Hub)       │
//!                                    └──────┬──────┘
//!                               ┌───────────┴───────────┐
//!                               ▼                       ▼
//!                        ┌─────────────┐         ┌─────────────┐
//!                        │ Journal     │         │ Client      │
//!                        │ → RocksDB   │         │ sessions    │
//!                        └─────────────┘         └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`] — JSON configuration file
//! - [`domain`] — Record kinds, schemas and orderings
//! - [`world`] — Domain factories, permissions, recovery
//! - [`storage`] — RocksDB record store and write journal
//! - [`session`] — Delivery terminal of one connection
//! - [`protocol`] — Request/response frames
//! - [`server`] — WebSocket server

pub mod config;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod world;

pub use config::ServerConfig;
pub use domain::{Record, RecordKind};
pub use error::{ConfigError, ProtocolError, RequestError, StoreError, WorldError};
pub use protocol::{Call, Request, Response};
pub use server::{ServerStats, WaffleServer};
pub use session::{ClientSession, SessionStats};
pub use storage::{Credential, Journal, RecordStore, StoreConfig, WriteOp};
pub use world::World;
