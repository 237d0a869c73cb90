//! Transport layer for the connection router.
//!
//! - HTTP: axum server that opens a request scope per inbound request

pub mod http;

pub use http::{HttpTransport, RouteConnection};

use crate::error::DbResult;
use std::future::Future;

/// Trait for server transport implementations.
pub trait Transport: Send + Sync {
    /// Start the transport and begin handling requests.
    ///
    /// This method should block until the transport is shut down.
    fn run(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
