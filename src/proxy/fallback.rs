//! Fallback routing
//!
//! Decides what happens to a request that is not proxied normally.

use super::AdmissionRequest;
use crate::acl::AccessControl;
use http::Uri;
use std::sync::Arc;

/// Where a request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Fully admitted, proxy it
    Proceed,
    /// Render the panel
    Panel,
    /// Pass through to the static fallback target
    Forward(Uri),
    /// Close without a response
    Drop,
}

/// Fallback router
pub struct FallbackRouter {
    host: Option<String>,
    target: Option<Uri>,
    acl: Arc<dyn AccessControl>,
}

impl FallbackRouter {
    /// `host` is matched case-insensitively; an empty host never matches.
    pub fn new(host: Option<String>, target: Option<Uri>, acl: Arc<dyn AccessControl>) -> Self {
        FallbackRouter {
            host: host
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty()),
            target,
            acl,
        }
    }

    /// Whether `host` is the panel host
    pub fn is_fallback_host(&self, host: &str) -> bool {
        self.host
            .as_deref()
            .map_or(false, |h| h.eq_ignore_ascii_case(host))
    }

    /// Route an authorized request.
    ///
    /// The panel host wins over everything, then admitted requests proceed.
    /// Refused requests see the panel when authenticated or allow-listed,
    /// otherwise they go to the fallback target or are dropped.
    pub fn route(&self, req: &AdmissionRequest) -> Route {
        if self.is_fallback_host(&req.host) {
            return Route::Panel;
        }
        if req.admitted() {
            return Route::Proceed;
        }
        if req.authenticated || self.acl.is_whitelisted(&req.host) {
            return Route::Panel;
        }
        match &self.target {
            Some(target) => Route::Forward(target.clone()),
            None => Route::Drop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    struct Whitelist(&'static str);

    impl AccessControl for Whitelist {
        fn is_allowed(&self, _req: &AdmissionRequest) -> bool {
            true
        }

        fn is_whitelisted(&self, host: &str) -> bool {
            host == self.0
        }
    }

    fn router(host: Option<&str>, target: Option<&str>) -> FallbackRouter {
        FallbackRouter::new(
            host.map(String::from),
            target.map(|t| t.parse().unwrap()),
            Arc::new(Whitelist("example.org")),
        )
    }

    fn request(host: &str, authenticated: bool, allowed: bool, within_quota: bool) -> AdmissionRequest {
        AdmissionRequest {
            method: Method::GET,
            host: host.to_string(),
            port: 80,
            user: if authenticated { "alice".to_string() } else { String::new() },
            authenticated,
            allowed,
            within_quota,
        }
    }

    #[test]
    fn test_fallback_host_always_panel() {
        let router = router(Some("Panel.Local"), Some("http://backup.local"));
        for flags in [(true, true, true), (false, false, false), (true, false, true)] {
            let req = request("panel.local", flags.0, flags.1, flags.2);
            assert_eq!(router.route(&req), Route::Panel);
        }
    }

    #[test]
    fn test_admitted_proceeds() {
        let router = router(Some("panel.local"), None);
        assert_eq!(router.route(&request("example.com", true, true, true)), Route::Proceed);
    }

    #[test]
    fn test_authenticated_refusal_gets_panel() {
        let router = router(None, Some("http://backup.local"));
        assert_eq!(router.route(&request("example.com", true, false, true)), Route::Panel);
        assert_eq!(router.route(&request("example.com", true, true, false)), Route::Panel);
    }

    #[test]
    fn test_whitelisted_host_gets_panel() {
        let router = router(None, None);
        assert_eq!(router.route(&request("example.org", false, false, false)), Route::Panel);
    }

    #[test]
    fn test_unauthenticated_goes_to_target() {
        let router = router(None, Some("http://backup.local"));
        match router.route(&request("example.com", false, true, true)) {
            Route::Forward(uri) => assert_eq!(uri.host(), Some("backup.local")),
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn test_nothing_configured_drops() {
        let router = router(None, None);
        assert_eq!(router.route(&request("example.com", false, true, true)), Route::Drop);
    }

    #[test]
    fn test_empty_fallback_host_never_matches() {
        let router = router(Some(""), None);
        assert!(!router.is_fallback_host(""));
        assert_eq!(router.route(&request("", false, false, false)), Route::Drop);
    }
}
