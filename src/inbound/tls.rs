//! TLS termination for the listener

use crate::config::TlsConfig;
use crate::{Error, Result};
use rustls::crypto::aws_lc_rs;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Build a TLS acceptor advertising `h2` and `http/1.1`
pub fn acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&config.cert)?))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(Error::tls(format!("no certificate in {}", config.cert)));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&config.key)?))?
        .ok_or_else(|| Error::tls(format!("no private key in {}", config.key)))?;

    let mut server = rustls::ServerConfig::builder_with_provider(Arc::new(
        aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;
    server.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files() {
        let config = TlsConfig {
            cert: "/nonexistent/cert.pem".to_string(),
            key: "/nonexistent/key.pem".to_string(),
        };
        assert!(matches!(acceptor(&config), Err(Error::Io(_))));
    }

    #[test]
    fn test_empty_certificate_file() {
        let path = std::env::temp_dir().join(format!("wicklight-empty-{}.pem", std::process::id()));
        std::fs::write(&path, "").unwrap();
        let path = path.to_string_lossy().to_string();

        let config = TlsConfig {
            cert: path.clone(),
            key: path.clone(),
        };
        assert!(matches!(acceptor(&config), Err(Error::Tls(_))));
        let _ = std::fs::remove_file(path);
    }
}
