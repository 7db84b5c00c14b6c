//! Network utilities

use crate::{Error, Result};
use socket2::SockRef;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// Split an authority (`host`, `host:port`, `[v6]:port`, `user@host:port`)
/// into a lowercase host and a port.
///
/// A missing, zero or unparsable port yields `default_port`.
pub fn split_host_port(authority: &str, default_port: u16) -> (String, u16) {
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host)
        .trim();

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        match rest.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':')),
            None => (rest, None),
        }
    } else {
        match authority.rsplit_once(':') {
            // A second colon means a bare IPv6 literal without a port
            Some((host, port)) if !host.contains(':') => (host, Some(port)),
            _ => (authority, None),
        }
    };

    let port = port
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|p| *p != 0)
        .unwrap_or(default_port);

    (host.to_ascii_lowercase(), port)
}

/// Join host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Open a TCP connection to `host:port`.
///
/// Every failure is reported as [`Error::Gateway`]; the underlying cause is
/// only logged.
pub async fn dial(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addr = join_host_port(host, port);

    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr.as_str())).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!("[outbound] dial {} failed: {}", addr, e);
            return Err(Error::Gateway);
        }
        Err(_) => {
            debug!("[outbound] dial {} timed out after {:?}", addr, timeout);
            return Err(Error::Gateway);
        }
    };

    configure_tcp_stream(&stream);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com:443", 80), ("example.com".to_string(), 443));
        assert_eq!(split_host_port("example.com", 80), ("example.com".to_string(), 80));
        assert_eq!(split_host_port("Example.COM:8080", 80), ("example.com".to_string(), 8080));
    }

    #[test]
    fn test_split_host_port_ipv6() {
        assert_eq!(split_host_port("[::1]:8443", 80), ("::1".to_string(), 8443));
        assert_eq!(split_host_port("[::1]", 443), ("::1".to_string(), 443));
        assert_eq!(split_host_port("fe80::1", 80), ("fe80::1".to_string(), 80));
    }

    #[test]
    fn test_split_host_port_userinfo_and_bad_port() {
        assert_eq!(split_host_port("bob:pw@host.local:81", 80), ("host.local".to_string(), 81));
        assert_eq!(split_host_port("host.local:http", 80), ("host.local".to_string(), 80));
        assert_eq!(split_host_port("host.local:0", 443), ("host.local".to_string(), 443));
        assert_eq!(split_host_port("", 80), (String::new(), 80));
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("example.com", 443), "example.com:443");
        assert_eq!(join_host_port("::1", 80), "[::1]:80");
    }

    #[tokio::test]
    async fn test_dial_refused_is_gateway_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = dial("127.0.0.1", port, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, Error::Gateway));
    }
}
