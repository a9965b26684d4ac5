//! # busrpc Core
//!
//! Request/response and streaming request/response semantics on top of a
//! topic-based publish/subscribe transport.
//!
//! ## Architecture
//!
//! ```text
//! RpcClient ─→ SenderAdapter ─→ transport ─→ RpcServer ─→ RequestHandler
//!    ▲                                           │
//!    └── ReplyDispatcher ←── ReceiverAdapter ←───┘ (reply channel)
//! ```
//!
//! - `domain/`: Correlation Registry, Session Registry, config, errors, metrics
//! - `ports/`: the `RequestHandler` applications implement
//! - `adapters/`: sender and receiver wrappers over `busrpc_bus::Transport`
//! - `client`, `server`: the orchestrators
//!
//! ## Guarantees
//!
//! - Each correlation id resolves its waiter at most once: response, timeout,
//!   cancel or shutdown, whichever removes the registry entry first.
//! - Messages of one streaming session share an ordering key and reach the
//!   server handler in send order.
//! - Admission limits reject new work synchronously instead of queuing it.
//! - `close()` resolves every outstanding waiter.

#![warn(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod client;
pub mod domain;
pub mod ports;
pub mod server;

pub use adapters::{ReceiverAdapter, SenderAdapter};
pub use client::{ResponseFuture, RpcClient};
pub use domain::{
    ConfigError, CorrelationRegistry, MetricsSnapshot, ResponseCallback, ResponseWaiter,
    RpcConfig, RpcError, RpcMetrics, RpcOutcome, RpcResult, SessionRegistry, StreamingSession,
};
pub use ports::RequestHandler;
pub use server::RpcServer;
