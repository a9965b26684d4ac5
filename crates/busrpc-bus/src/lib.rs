//! # busrpc Bus
//!
//! The transport collaborator the RPC core talks to.
//!
//! ## Contract
//!
//! ```text
//! ┌──────────────┐  publish / publish_ordered   ┌──────────────┐
//! │  Producer    │ ───────────────────────────→ │  Channel     │
//! └──────────────┘                              │  p0 p1 .. pN │
//!                                               └──────────────┘
//!                                                     │ one worker per partition
//!                                                     ▼
//!                                               MessageHandler::on_message
//! ```
//!
//! - Messages sharing an ordering key land in one partition and are
//!   delivered in send order.
//! - Properties attached at publish time round-trip unchanged.
//! - Delivery is at-least-once from the core's point of view; correlation
//!   in `busrpc-core` turns that into at-most-one completion.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod memory;
pub mod transport;

pub use memory::InMemoryTransport;
pub use transport::{
    MessageHandler, PublishCallback, SubscriptionId, Transport, TransportError, TransportPtr,
};

/// Partitions per channel used by [`InMemoryTransport::new`].
pub const DEFAULT_PARTITIONS: usize = 4;
