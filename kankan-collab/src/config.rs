//! Configuration for the sync layer, the durable store and the relay.

use std::path::PathBuf;

use kankan_core::invite::DEFAULT_INVITE_BASE;

/// Application-level sync settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Transport namespace shared by every board room
    pub app_id: String,
    /// Base URL used when building invite links
    pub invite_base: String,
    /// Storage key prefix; the board id is appended
    pub board_key_prefix: String,
    /// Storage key of the board directory record
    pub directory_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            app_id: "wf-kanban".to_string(),
            invite_base: DEFAULT_INVITE_BASE.to_string(),
            board_key_prefix: "kanban:board:".to_string(),
            directory_key: "kanban:boards".to_string(),
        }
    }
}

impl SyncConfig {
    /// Storage key under which `board_id` is persisted.
    pub fn board_key(&self, board_id: &str) -> String {
        format!("{}{board_id}", self.board_key_prefix)
    }
}

/// Durable store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write
    pub sync_writes: bool,
    /// Max open files for RocksDB
    pub max_open_files: i32,
    /// Write buffer size per column family
    pub write_buffer_size: usize,
    /// Logged updates per board before they are folded into a snapshot
    pub compaction_threshold: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("kankan_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
            compaction_threshold: 500,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, caller-provided directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
            compaction_threshold: 500,
        }
    }
}

/// WebSocket relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub room_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            room_capacity: 256,
        }
    }
}

impl RelayConfig {
    pub const ADDR_ENV: &'static str = "KANKAN_RELAY_ADDR";
    pub const CAPACITY_ENV: &'static str = "KANKAN_RELAY_CAPACITY";

    /// Defaults overridden by `KANKAN_RELAY_ADDR` and `KANKAN_RELAY_CAPACITY`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(Self::ADDR_ENV) {
            if !addr.trim().is_empty() {
                config.bind_addr = addr.trim().to_string();
            }
        }
        if let Ok(raw) = std::env::var(Self::CAPACITY_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.room_capacity = capacity,
                _ => log::warn!("Ignoring invalid {}={raw}", Self::CAPACITY_ENV),
            }
        }
        config
    }

    /// Loopback config on an OS-assigned port.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            room_capacity: 64,
        }
    }
}
