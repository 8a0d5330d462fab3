//! Mute/block sync and timeline filtering core.
//!
//! This library exposes core modules for testing and integration purposes.

pub mod capture;              // Request/cookie observation -> typed capture events
pub mod commands;             // Popup/action command surface + responses
pub mod config;               // FilterConfig: env/TOML overrides, validation
pub mod cooldown;             // Rate-limit cooldown + auth gate state machine
pub mod coordinator;          // Event/command router wiring capture to refreshes
pub mod credentials;          // Bearer/csrf store (zeroized, masked in logs)
pub mod error;                // ApiError classification for list fetches
pub mod fetcher;              // Paginated GraphQL list fetcher
pub mod filter;               // DOM filtering engine (hide/show, rescan, retry)
pub mod handles;              // Handle normalization + list sets
pub mod import;               // Manual import tabs + completion notification
pub mod orchestrator;         // Debounced, gated refresh cycles
pub mod parse;                // Timeline response -> handles extraction
pub mod query_config;         // Captured GraphQL query id/feature cache
pub mod storage;              // sled-backed persistent state + change events

// Re-export commonly used types
pub use commands::{Command, CommandResponse, RefreshSummary};
pub use config::FilterConfig;
pub use coordinator::Coordinator;
pub use filter::{Document, FilterEngine};
pub use handles::{normalize_handle, HandleSet, ListAction, ListKind};
pub use orchestrator::{RefreshOrchestrator, RefreshReason};
pub use storage::{Storage, StorageChange};
