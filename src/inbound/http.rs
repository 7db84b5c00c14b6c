//! HTTP inbound
//!
//! Serves HTTP/1.x with upgrades and HTTP/2 on one port. Plain-text
//! connections are told apart by the HTTP/2 preface, TLS ones by ALPN.

use super::InboundListener;
use crate::common::net::configure_tcp_stream;
use crate::config::Config;
use crate::proxy::ProxyService;
use crate::Result;
use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, trace};

const H2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Time allowed for the TLS handshake or the first request bytes
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const SNIFF_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Http1,
    Http2,
}

/// HTTP proxy listener
pub struct HttpListener {
    listen: String,
    tls: Option<TlsAcceptor>,
    service: Arc<ProxyService>,
    running: AtomicBool,
}

impl HttpListener {
    pub fn new(config: &Config, service: Arc<ProxyService>) -> Result<Self> {
        let tls = config.tls.as_ref().map(super::tls::acceptor).transpose()?;

        Ok(HttpListener {
            listen: config.listen.clone(),
            tls,
            service,
            running: AtomicBool::new(false),
        })
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let service = self.service.clone();
                    let tls = self.tls.clone();
                    tokio::spawn(async move {
                        Self::handle_connection(service, tls, stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        error!("HTTP accept error: {}", e);
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_connection(
        service: Arc<ProxyService>,
        tls: Option<TlsAcceptor>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) {
        trace!("[inbound] connection from {}", peer_addr);
        if let Err(e) = Self::process_connection(service, tls, stream).await {
            debug!("[inbound] connection from {} ended: {}", peer_addr, e);
        }
    }

    async fn process_connection(
        service: Arc<ProxyService>,
        tls: Option<TlsAcceptor>,
        stream: TcpStream,
    ) -> Result<()> {
        configure_tcp_stream(&stream);

        match tls {
            Some(acceptor) => {
                let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await??;
                let protocol = match stream.get_ref().1.alpn_protocol() {
                    Some(b"h2") => Protocol::Http2,
                    _ => Protocol::Http1,
                };
                serve_connection(TokioIo::new(stream), protocol, service).await
            }
            None => {
                let protocol = tokio::time::timeout(HANDSHAKE_TIMEOUT, sniff_protocol(&stream)).await??;
                serve_connection(TokioIo::new(stream), protocol, service).await
            }
        }
    }
}

#[async_trait]
impl InboundListener for HttpListener {
    fn name(&self) -> &str {
        "HTTP"
    }

    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen).await?;
        let addr = listener.local_addr()?;
        info!(
            "HTTP proxy listening on {}{}",
            addr,
            if self.tls.is_some() { " (TLS)" } else { "" }
        );

        self.serve(listener).await
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn serve_connection<I>(io: TokioIo<I>, protocol: Protocol, service: Arc<ProxyService>) -> Result<()>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let svc = service_fn(move |req: Request<Incoming>| service.clone().handle(req));

    match protocol {
        Protocol::Http1 => {
            http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(io, svc)
                .with_upgrades()
                .await?
        }
        Protocol::Http2 => {
            http2::Builder::new(TokioExecutor::new())
                .timer(TokioTimer::new())
                .serve_connection(io, svc)
                .await?
        }
    }

    Ok(())
}

/// Peek at the first bytes for the HTTP/2 connection preface
async fn sniff_protocol(stream: &TcpStream) -> std::io::Result<Protocol> {
    let mut buf = [0u8; 24];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 || buf[..n] != H2_PREFACE[..n] {
            return Ok(Protocol::Http1);
        }
        if n == H2_PREFACE.len() {
            return Ok(Protocol::Http2);
        }
        // Partial preface, wait for the rest
        tokio::time::sleep(SNIFF_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;
    use crate::quota::QuotaStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn sniff(payload: &'static [u8]) -> Protocol {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(payload).await.unwrap();
            stream
        });
        let (server, _) = listener.accept().await.unwrap();
        let _client = client.await.unwrap();
        sniff_protocol(&server).await.unwrap()
    }

    #[test]
    fn test_preface_length() {
        assert_eq!(H2_PREFACE.len(), 24);
    }

    #[tokio::test]
    async fn test_sniff_http1() {
        assert_eq!(sniff(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n").await, Protocol::Http1);
    }

    #[tokio::test]
    async fn test_sniff_http2() {
        assert_eq!(sniff(H2_PREFACE).await, Protocol::Http2);
    }

    #[tokio::test]
    async fn test_connect_over_foreign_transport_reports_into_tunnel() {
        // Accepts through the backlog, never read
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap();

        let mut config = Config::default();
        config.users = vec![UserConfig {
            username: "alice".to_string(),
            password: "secret".to_string(),
            quota: None,
        }];
        let service = Arc::new(ProxyService::from_config(&config).unwrap());

        // An in-memory pipe cannot be taken over as a socket
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_connection(TokioIo::new(server), Protocol::Http1, service.clone()));

        let connect = format!(
            "CONNECT {0} HTTP/1.1\r\nHost: {0}\r\nProxy-Authorization: Basic YWxpY2U6c2VjcmV0\r\n\r\n",
            target
        );
        client.write_all(connect.as_bytes()).await.unwrap();

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        let received = String::from_utf8_lossy(&received);
        assert!(received.starts_with("HTTP/1.1 200"), "unexpected: {}", received);
        assert!(received.contains("Unsupported connection"));
        assert_eq!(service.quota().format("alice"), "0 B/unlimited");
    }
}
