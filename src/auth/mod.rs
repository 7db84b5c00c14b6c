//! Proxy credential checking
//!
//! Decodes `Proxy-Authorization: Basic ...` and verifies it against the
//! configured users with constant-time comparison.

use crate::config::UserConfig;
use base64::Engine;
use http::header::PROXY_AUTHORIZATION;
use http::HeaderMap;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

/// Resolves the identity behind a request.
pub trait Authenticator: Send + Sync {
    /// Returns the user name when the credentials are valid.
    fn authenticate(&self, headers: &HeaderMap) -> Option<String>;
}

/// HTTP Basic proxy authentication against a static user table
pub struct BasicAuthenticator {
    users: HashMap<String, String>,
}

impl BasicAuthenticator {
    pub fn new(users: &[UserConfig]) -> Self {
        BasicAuthenticator {
            users: users
                .iter()
                .map(|u| (u.username.clone(), u.password.clone()))
                .collect(),
        }
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(expected) => constant_time_eq(password.as_bytes(), expected.as_bytes()),
            None => false,
        }
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers.get(PROXY_AUTHORIZATION)?.to_str().ok()?;
        let (username, password) = decode_basic(value)?;
        self.verify(&username, &password).then_some(username)
    }
}

/// Parse "Basic base64(user:pass)"
fn decode_basic(value: &str) -> Option<(String, String)> {
    let value = value.trim();
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let creds = String::from_utf8(decoded).ok()?;
    let (user, pass) = creds.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn basic(user: &str, pass: &str) -> HeaderMap {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
        let mut headers = HeaderMap::new();
        headers.insert(
            PROXY_AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", token)).unwrap(),
        );
        headers
    }

    fn authenticator() -> BasicAuthenticator {
        BasicAuthenticator::new(&[UserConfig {
            username: "alice".to_string(),
            password: "s3cret:with:colons".to_string(),
            quota: None,
        }])
    }

    #[test]
    fn test_valid_credentials() {
        let auth = authenticator();
        assert_eq!(
            auth.authenticate(&basic("alice", "s3cret:with:colons")),
            Some("alice".to_string())
        );
    }

    #[test]
    fn test_invalid_credentials() {
        let auth = authenticator();
        assert_eq!(auth.authenticate(&basic("alice", "wrong")), None);
        assert_eq!(auth.authenticate(&basic("mallory", "s3cret:with:colons")), None);
        assert_eq!(auth.authenticate(&HeaderMap::new()), None);
    }

    #[test]
    fn test_malformed_header() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert(PROXY_AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(auth.authenticate(&headers), None);

        headers.insert(PROXY_AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert_eq!(auth.authenticate(&headers), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secre"));
    }
}
