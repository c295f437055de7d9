//! Resilient request core
//!
//! Shared request pipeline embedded by the vendor API clients:
//! - Client-side rate governing (fixed interval, sliding window, token bucket)
//! - Retry with exponential backoff, honoring server `Retry-After` hints
//! - Classification of HTTP outcomes into a closed error taxonomy
//! - Pluggable transport and credential providers
//! - Observability (tracing, metrics)
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use integrations_request_core::{CoreConfig, RequestDescriptor, RequestExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::builder()
//!         .base_url("https://api.example.com/v3")?
//!         .sliding_window(10, Duration::from_secs(1))
//!         .api_token("secret")
//!         .build()?;
//!     let executor = RequestExecutor::connect(&config)?;
//!
//!     let contacts: serde_json::Value = executor
//!         .execute(&RequestDescriptor::get("/contacts").query("limit", 50))
//!         .await?;
//!     println!("{}", contacts);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Core modules
pub mod auth;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod transport;

// Resilience
pub mod resilience;

// Observability
pub mod observability;

// Testing utilities
pub mod mocks;

// Re-exports for convenience
pub use classifier::ErrorClassifier;
pub use config::{CoreConfig, CoreConfigBuilder};
pub use errors::{ClassifiedError, ErrorKind, RequestError, RequestResult};
pub use resilience::{GovernorConfig, RateGovernor, RequestExecutor, RetryConfig};
pub use transport::{HttpTransport, RawResponse, RequestDescriptor};

/// Default timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum retries
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Create an executor over the reqwest transport
pub fn create_executor(config: &CoreConfig) -> Result<RequestExecutor, errors::ConfigurationError> {
    RequestExecutor::connect(config)
}

/// Create an executor from `<PREFIX>_*` environment variables
///
/// Reads `<PREFIX>_BASE_URL` (required) plus the optional variables listed
/// on [`CoreConfig::from_lookup`].
pub fn create_executor_from_env(
    prefix: &str,
) -> Result<RequestExecutor, errors::ConfigurationError> {
    let config = CoreConfig::from_env(prefix)?;
    create_executor(&config)
}
