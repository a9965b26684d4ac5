//! Adapters over the transport collaborator.
//!
//! - `SenderAdapter`: plain, ordered and non-blocking publish
//! - `ReceiverAdapter`: one subscription, one dispatch callback

pub mod receiver;
pub mod sender;

pub use receiver::ReceiverAdapter;
pub use sender::SenderAdapter;
