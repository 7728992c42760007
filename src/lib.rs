//! Client-side plumbing for live-updating market dashboards: a reconnecting
//! push-update channel with bounded exponential backoff and subscription
//! replay, plus a keyed debounce coalescer that collapses bursts of refresh
//! signals into single downstream executions.

/// Reconnecting push-update channel and connection state machine.
pub mod channel;
/// Command-line argument definitions.
pub mod cli;
/// Debounced refresh coalescing keyed by consumer.
pub mod coalescer;
/// Runtime configuration model.
pub mod config;
/// Typed multi-subscriber event emitter.
pub mod emitter;
/// Error types used across the crate.
pub mod error;
/// Metrics setup and global counters.
pub mod monitoring;
/// Exponential backoff retry policy.
pub mod retry;
/// Tracing/logging initialization.
pub mod tracing_setup;
/// Abstract duplex transport and the WebSocket implementation.
pub mod transport;
/// Wire envelope and payload models.
pub mod types;

pub use channel::{ConnectionState, ReconnectingChannel};
pub use coalescer::UpdateCoalescer;
pub use emitter::{Emitter, HandlerId};
/// Primary crate error type.
pub use error::TickwireError;
pub use retry::RetryPolicy;
pub use transport::{Transport, TransportEvent, WsTransport};
