//! Request classification and admission
//!
//! Every request is classified (target + identity) and then checked against
//! the ACL and the quota store. All three checks always run so the audit
//! record carries the full picture.

use crate::acl::AccessControl;
use crate::auth::Authenticator;
use crate::common::net::{join_host_port, split_host_port};
use crate::quota::QuotaStore;
use http::header::HOST;
use http::uri::Scheme;
use http::{Method, Request};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-request admission state, read-only once authorized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// Request method
    pub method: Method,
    /// Destination host (lowercase, no brackets)
    pub host: String,
    /// Destination port
    pub port: u16,
    /// Declared identity, empty when unauthenticated
    pub user: String,
    /// Credentials were valid
    pub authenticated: bool,
    /// ACL verdict
    pub allowed: bool,
    /// Quota verdict
    pub within_quota: bool,
}

impl AdmissionRequest {
    /// All three checks passed
    pub fn admitted(&self) -> bool {
        self.authenticated && self.allowed && self.within_quota
    }

    /// `host:port` of the destination
    pub fn target(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// Extract destination and identity from a request.
///
/// `allowed` and `within_quota` are left false; [`Authorizer::authorize`]
/// fills them in.
pub fn classify<B>(req: &Request<B>, auth: &dyn Authenticator) -> AdmissionRequest {
    let (host, port) = classify_target(req);
    let (user, authenticated) = match auth.authenticate(req.headers()) {
        Some(user) => (user, true),
        None => (String::new(), false),
    };

    AdmissionRequest {
        method: req.method().clone(),
        host,
        port,
        user,
        authenticated,
        allowed: false,
        within_quota: false,
    }
}

fn classify_target<B>(req: &Request<B>) -> (String, u16) {
    let uri = req.uri();
    let default_port = if req.method() == Method::CONNECT || uri.scheme() == Some(&Scheme::HTTPS) {
        443
    } else {
        80
    };

    let authority = uri
        .authority()
        .map(|a| a.as_str())
        .or_else(|| req.headers().get(HOST).and_then(|h| h.to_str().ok()))
        .unwrap_or_default();

    split_host_port(authority, default_port)
}

/// Authentication + ACL + quota pipeline
#[derive(Clone)]
pub struct Authorizer {
    auth: Arc<dyn Authenticator>,
    acl: Arc<dyn AccessControl>,
    quota: Arc<dyn QuotaStore>,
}

impl Authorizer {
    pub fn new(
        auth: Arc<dyn Authenticator>,
        acl: Arc<dyn AccessControl>,
        quota: Arc<dyn QuotaStore>,
    ) -> Self {
        Authorizer { auth, acl, quota }
    }

    /// Classify and authorize a request, then emit its audit record
    pub fn authorize<B>(&self, req: &Request<B>) -> AdmissionRequest {
        let mut admission = classify(req, self.auth.as_ref());
        admission.allowed = self.acl.is_allowed(&admission);
        admission.within_quota = self.quota.check(&admission.user);

        audit(&admission, &self.quota.format(&admission.user));
        admission
    }
}

fn audit(req: &AdmissionRequest, quota: &str) {
    if req.admitted() {
        debug!(
            user = %req.user,
            quota = %quota,
            method = %req.method,
            host = %req.host,
            port = req.port,
            authenticated = req.authenticated,
            allowed = req.allowed,
            within_quota = req.within_quota,
            "[proxy] admitted"
        );
    } else {
        warn!(
            user = %req.user,
            quota = %quota,
            method = %req.method,
            host = %req.host,
            port = req.port,
            authenticated = req.authenticated,
            allowed = req.allowed,
            within_quota = req.within_quota,
            "[proxy] refused"
        );
    }
}
