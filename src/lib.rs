//! Wicklight - authenticating HTTP proxy gateway
//!
//! Every request is authenticated, checked against an ACL and a per-user
//! data quota, then either tunneled (CONNECT, over HTTP/1.x or HTTP/2) or
//! forwarded as a reverse-proxied HTTP call. Requests that are refused go
//! to the fallback panel, a static fallback target, or nowhere.
//!
//! # Architecture
//!
//! ```text
//!               +-------------+
//!               |  inbound/   |  TCP / TLS, HTTP/1.x + HTTP/2
//!               +------+------+
//!                      |
//!               +------v------+     +-------+ +------+ +--------+
//!               |   proxy/    +---->| auth/ | | acl/ | | quota/ |
//!               +--+---+---+--+     +-------+ +------+ +--------+
//!                  |   |   |
//!     +------------+   |   +------------+
//!     |                |                |
//! +---v----+     +-----v-----+     +----v----+
//! | tunnel |     |  forward  |     | panel/  |
//! +---+----+     +-----------+     +---------+
//!     |
//! +---v--------+
//! | transport/ |
//! +------------+
//! ```

pub mod acl;
pub mod auth;
pub mod common;
pub mod config;
pub mod inbound;
pub mod panel;
pub mod proxy;
pub mod quota;
pub mod transport;

pub use common::error::{Error, Result};
pub use config::Config;
pub use proxy::{Collaborators, ProxyService};

use inbound::InboundListener;
use std::sync::Arc;
use tracing::{info, warn};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Gateway instance managing all components
pub struct Gateway {
    config: Config,
    service: Arc<ProxyService>,
    inbounds: Vec<Arc<dyn InboundListener>>,
}

impl Gateway {
    /// Create a new Gateway from configuration
    pub fn new(config: Config) -> Result<Self> {
        info!("Initializing wicklight v{}", VERSION);

        let service = Arc::new(ProxyService::from_config(&config)?);
        info!(
            "Loaded {} users, {} ACL rules, {} whitelist entries",
            config.users.len(),
            config.acl.len(),
            config.whitelist.len()
        );

        let listener = inbound::HttpListener::new(&config, service.clone())?;
        let inbounds: Vec<Arc<dyn InboundListener>> = vec![Arc::new(listener)];

        Ok(Gateway {
            config,
            service,
            inbounds,
        })
    }

    /// Run all listeners until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        info!("Starting gateway...");

        let mut handles = Vec::new();
        for inbound in &self.inbounds {
            let inbound = inbound.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = inbound.start().await {
                    warn!("{} listener error: {}", inbound.name(), e);
                }
            }));
        }

        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");

        for inbound in &self.inbounds {
            inbound.stop().await?;
        }
        for handle in handles {
            handle.abort();
        }

        info!("Gateway stopped");
        Ok(())
    }

    /// Get current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get proxy service reference
    pub fn service(&self) -> &Arc<ProxyService> {
        &self.service
    }
}
