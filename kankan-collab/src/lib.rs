//! # kankan-collab: Peer-to-peer board replication for Kankan
//!
//! Keeps every open board convergent across peers and durable across
//! restarts. Peers meet in rooms named after board ids and exchange state
//! vectors and updates; there is no authoritative copy anywhere.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  ensure_session  ┌──────────────┐
//! │ SessionRegistry │ ───────────────► │ BoardSession │ ◄─► Transport room
//! │ (directory)     │ ◄─────────────── │ (per board)  │     (memory / relay)
//! └────────┬────────┘  board_changed   └──────┬───────┘
//!          │                                  │
//!          ▼                                  ▼
//!   ┌─────────────┐                  ┌──────────────────┐
//!   │ BoardStore  │ ◄──────────────  │ BoardPersistence │
//!   │ (RocksDB)   │                  └──────────────────┘
//!   └─────────────┘
//!
//! ┌─────────────┐   WebSocket    ┌─────────────┐
//! │ RelayTransport ◄───────────► │ RelayServer │  stateless fan-out
//! └─────────────┘  bincode frames└─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: sync actions and relay frames
//! - [`transport`]: room abstraction with in-memory and relay backends
//! - [`session`]: one open board and its sync loop
//! - [`registry`]: board directory and session cache
//! - [`storage`]: RocksDB persistence
//! - [`broadcast`] / [`server`]: the relay

pub mod broadcast;
pub mod config;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;

pub use broadcast::{BroadcastGroup, RoomManager};
pub use config::{RelayConfig, StoreConfig, SyncConfig};
pub use protocol::{ActionPayload, FrameKind, ProtocolError, RelayFrame, SyncAction, SyncMessage};
pub use registry::SessionRegistry;
pub use server::{RelayServer, RelayStats};
pub use session::{BoardSession, SessionListener};
pub use storage::{BoardMetadata, BoardPersistence, BoardStore, StoreError};
pub use transport::{
    MemoryNetwork, PeerId, RelayTransport, RoomEvent, RoomHandle, RoomKey, RoomLink, Transport,
};
