//! Observability: structured logging and in-memory metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, redact_headers, LogFormat, LogLevel, LoggingConfig};
pub use metrics::{InFlight, MetricsCollector, MetricsSnapshot};
