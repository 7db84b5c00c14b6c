//! Proxy core
//!
//! [`ProxyService`] handles one request at a time: authorize, route, then
//! tunnel (CONNECT) or forward (everything else).

mod admission;
mod fallback;
mod forward;
mod tunnel;

pub use admission::{classify, AdmissionRequest, Authorizer};
pub use fallback::{FallbackRouter, Route};
pub use forward::{passthrough_uri, upstream_uri, ForwardMode, ReverseProxy};
pub use tunnel::TunnelTransport;

use crate::acl::{AccessControl, RuleAcl};
use crate::auth::{Authenticator, BasicAuthenticator};
use crate::config::Config;
use crate::panel::{self, Panel, PanelContext};
use crate::quota::{MemoryQuota, QuotaStore};
use crate::{Error, Result};
use axum::body::Body;
use bytes::Bytes;
use http::{Method, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// External collaborators consulted for every request
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn Authenticator>,
    pub acl: Arc<dyn AccessControl>,
    pub quota: Arc<dyn QuotaStore>,
}

impl Collaborators {
    /// Default collaborators built from the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Collaborators {
            auth: Arc::new(BasicAuthenticator::new(&config.users)),
            acl: Arc::new(RuleAcl::new(&config.acl, &config.whitelist)?),
            quota: Arc::new(MemoryQuota::new(&config.users)),
        })
    }
}

/// Per-request entry point
pub struct ProxyService {
    authorizer: Authorizer,
    quota: Arc<dyn QuotaStore>,
    router: FallbackRouter,
    forwarder: ReverseProxy,
    panel: Panel,
    dial_timeout: Duration,
}

impl ProxyService {
    pub fn new(config: &Config, collaborators: Collaborators) -> Result<Self> {
        let Collaborators { auth, acl, quota } = collaborators;

        Ok(ProxyService {
            authorizer: Authorizer::new(auth, acl.clone(), quota.clone()),
            router: FallbackRouter::new(config.fallback.host.clone(), config.fallback_target()?, acl),
            quota,
            forwarder: ReverseProxy::new()?,
            panel: Panel::new(),
            dial_timeout: config.dial_timeout(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config, Collaborators::from_config(config)?)
    }

    /// Quota collaborator
    pub fn quota(&self) -> &Arc<dyn QuotaStore> {
        &self.quota
    }

    /// Handle one request.
    ///
    /// `Err(Error::Dropped)` means the request must be closed without a
    /// response.
    pub async fn handle<B>(self: Arc<Self>, req: Request<B>) -> Result<Response<Body>>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<axum::BoxError>,
    {
        let req = req.map(Body::new);
        let admission = self.authorizer.authorize(&req);

        match self.router.route(&admission) {
            Route::Proceed => {}
            Route::Panel => return Ok(self.render_panel(req, &admission, None).await),
            Route::Forward(target) => {
                debug!("[proxy] {} passed to fallback target {}", admission.target(), target);
                return Ok(self
                    .forwarder
                    .forward(req, &target, ForwardMode::Passthrough)
                    .await);
            }
            Route::Drop => {
                debug!("[proxy] {} dropped", admission.target());
                return Err(Error::Dropped);
            }
        }

        if req.method() == Method::CONNECT {
            Ok(tunnel::establish(self, req, admission).await)
        } else {
            Ok(forward::dispatch(&self.forwarder, req, &admission).await)
        }
    }

    async fn render_panel(
        &self,
        mut req: Request<Body>,
        admission: &AdmissionRequest,
        error: Option<&Error>,
    ) -> Response<Body> {
        let ctx = PanelContext::new(admission, self.quota.format(&admission.user), error);

        if req.method() == Method::CONNECT {
            if let Ok((_, on_upgrade)) = TunnelTransport::negotiate(&mut req) {
                return tunnel::deliver_page(on_upgrade, panel::render(&ctx));
            }
        }
        self.panel.respond(req, ctx).await
    }
}
