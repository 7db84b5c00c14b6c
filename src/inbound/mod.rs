//! Inbound adapters (listeners)

mod http;
mod tls;

pub use self::http::HttpListener;

use crate::Result;
use async_trait::async_trait;

/// Trait for inbound listeners
#[async_trait]
pub trait InboundListener: Send + Sync {
    /// Get listener name
    fn name(&self) -> &str;

    /// Start the listener
    async fn start(&self) -> Result<()>;

    /// Stop the listener
    async fn stop(&self) -> Result<()>;

    /// Check if listener is running
    fn is_running(&self) -> bool;
}
