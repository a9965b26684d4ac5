//! # busrpc Test Suite
//!
//! End-to-end scenarios that wire `RpcClient`, `RpcServer` and the
//! in-memory transport together.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── rpc_benchmarks.rs   # Round-trip and registry throughput
//! └── src/integration/
//!     ├── round_trip.rs       # Single requests
//!     ├── streaming.rs        # Streaming and bidirectional sessions
//!     └── lifecycle.rs        # Admission, timeouts, shutdown
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p busrpc-tests
//! cargo test -p busrpc-tests integration::streaming::
//! cargo bench -p busrpc-tests
//! ```

#[cfg(test)]
mod integration;
