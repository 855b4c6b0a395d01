use log::info;

pub mod config;
pub mod cs;
pub mod error;
pub mod eviction;
pub mod face;
pub mod fib;
pub mod forwarder;
pub mod pit;
pub mod plugin;
pub mod strategy;
pub mod strategy_table;
pub mod trie;

#[cfg(test)]
mod test_support;

pub use config::{CachePolicy, ForwarderConfig};
pub use cs::{new_content_store, BoundedContentStore, ContentStore, CsEntry, CsStats, TrieContentStore};
pub use error::{FwError, Result};
pub use face::{attach_queue_face, spawn_face_ingress, Face, FaceCounters, FaceHandle, FaceStats, FaceTable, QueueFace};
pub use fib::{Fib, FibEntry, NextHop, Route};
pub use forwarder::{Forwarder, ForwarderStats};
pub use pit::{DuplicateNonce, EndpointErasure, InRecord, OutRecord, Pit, PitEntry};
pub use plugin::{Plugin, PluginChain};
pub use strategy::{create_strategy, BestRoute, DefaultTriggers, Multicast, Strategy};
pub use strategy_table::{StrategyChoice, StrategyListing, StrategyTable};
pub use trie::{ExactMatch, PrefixTrie};

pub fn init() {
    info!("MIR forwarding engine initialized");
}
