//! Ports layer.
//!
//! - Inbound: the application logic a server dispatches to
//! - Outbound: the transport contract, defined in `busrpc-bus`

pub mod inbound;

pub use inbound::*;
