//! Shared types, error model, and configuration for rangemeld.
//!
//! This crate is the foundation depended on by all other rangemeld crates.
//! It provides:
//! - [`MeldError`], the unified error type
//! - Domain types ([`TypedValue`], [`Document`], [`RawRecord`])
//! - Network helpers ([`parse_network`], [`interval_networks`], [`NetworkKey`])
//! - Configuration ([`AppConfig`], [`DatabaseConfig`], config loading)

pub mod config;
pub mod error;
pub mod network;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConditionalResetRule, DatabaseConfig, InputConfig, InputKind, MergeConfig,
    MmdbConfig, OptimizationConfig, init_config, load_config_from, parse_config,
    validate_config,
};
pub use error::{MeldError, Result};
pub use network::{NetworkKey, interval_networks, parse_addr, parse_network, widen};
pub use types::{Document, Node, RawRecord, RawValue, RecordRange, ScalarType, TypeTag, TypedValue};

pub use ip_network::IpNetwork;
