//! Durable board storage.
//!
//! ```text
//! ┌───────────────┐   observer    ┌──────────────────┐
//! │ BoardDocument │ ────────────► │ BoardPersistence │
//! │               │ ◄──────────── │  (per board)     │
//! └───────────────┘   load        └────────┬─────────┘
//!                                          │
//!                                          ▼
//!                     ┌────────────────────────────────────────┐
//!                     │ BoardStore (RocksDB)                   │
//!                     │ CF "snapshots": compacted state (LZ4)  │
//!                     │ CF "updates":   update log (LZ4)       │
//!                     │ CF "metadata":  bookkeeping, directory │
//!                     └────────────────────────────────────────┘
//! ```

pub mod persistence;
pub mod rocks;

pub use persistence::BoardPersistence;
pub use rocks::{BoardMetadata, BoardStore, StoreError};
