//! # anticycle-core
//!
//! The engine that watches a Bitcoin node's mempool for replacement-cycling
//! attacks against time-sensitive transactions (e.g. Lightning HTLCs) and
//! resubmits their defenders when an attacker cycles them out of the
//! top-of-block.
//!
//! This crate is transport-agnostic: it knows nothing about ZeroMQ or
//! JSON-RPC directly. It is driven through the [`events::EventSource`],
//! [`rpc::NodeClient`], and [`rpc::FeeOracle`] traits; the `anticycle-node`
//! binary crate supplies the concrete implementations over a live node.

pub mod cache;
pub mod config;
pub mod cycle_counter;
pub mod dispatcher;
pub mod doublespend;
pub mod engine;
pub mod error;
pub mod events;
pub mod feerate;
pub mod rpc;
pub mod types;

pub use config::EngineConfig;
pub use engine::CycleEngine;
pub use error::{ConfigError, EventSourceError, RpcError};
pub use events::{EventSource, Label, MempoolEvent};
pub use feerate::{FeeRate, PackageMode};
pub use rpc::{FeeOracle, NodeClient};
pub use types::{MempoolEntry, RawTx, Txid, Utxo};
