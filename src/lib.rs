pub mod block_processor;
pub mod chain;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod metrics_rollup;
pub mod pending;
pub mod reorg;
pub mod rpc;
pub mod signatures;
pub mod store;
pub mod sumtree;
pub mod telemetry;
