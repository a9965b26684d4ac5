//! Domain layer: registries, configuration, errors, and metrics.
//!
//! Nothing here talks to the transport directly; the orchestrator and the
//! dispatcher drive these types.

pub mod config;
pub mod correlation;
pub mod error;
pub mod metrics;
pub mod session;

// Re-exports for convenience
pub use config::{ConfigError, RpcConfig};
pub use correlation::{CorrelationRegistry, ResponseWaiter, RpcOutcome};
pub use error::{RpcError, RpcResult};
pub use metrics::{MetricsSnapshot, RpcMetrics};
pub use session::{ResponseCallback, SessionRegistry, StreamingSession};
