//! HTTP transport layer.
//!
//! The executor never talks to the network itself; it hands each attempt to
//! an [`HttpTransport`] owned by the vendor client.

mod http_transport;
mod request;

pub use http_transport::{HttpTransport, ReqwestTransport};
pub use request::{RawResponse, RequestDescriptor};
