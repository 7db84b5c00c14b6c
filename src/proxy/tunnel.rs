//! CONNECT tunnel establishment
//!
//! The 200 handshake is returned to hyper as a normal bodyless response.
//! A spawned session then waits for hyper to hand the connection over,
//! which only happens once the handshake is on the wire, dials the target
//! and relays. HTTP/1.x connections are taken over as raw sockets; HTTP/2
//! streams are relayed through their DATA frames.
//!
//! After the handshake no status can be sent anymore, so every failure is
//! reported by writing the panel page into the tunnel and closing it.

use super::{AdmissionRequest, ProxyService};
use crate::common::net::dial;
use crate::panel::{self, PanelContext};
use crate::transport::{relay, Traffic};
use crate::{Error, Result};
use axum::body::Body;
use bytes::Bytes;
use http::{Request, Response, Version};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tracing::{debug, trace};
use uuid::Uuid;

/// Upper bound for delivering the failure page
const FAIL_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// How tunnel bytes reach the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelTransport {
    /// HTTP/1.x: take over the socket
    Raw,
    /// HTTP/2: stream through the request and response bodies
    Streamed,
}

impl TunnelTransport {
    /// Relay strategy for a protocol version, `None` if it cannot tunnel
    pub fn for_version(version: Version) -> Option<Self> {
        match version {
            Version::HTTP_10 | Version::HTTP_11 => Some(TunnelTransport::Raw),
            Version::HTTP_2 => Some(TunnelTransport::Streamed),
            _ => None,
        }
    }

    /// Resolve the strategy and claim the connection hand-over handle
    pub(super) fn negotiate<B>(req: &mut Request<B>) -> Result<(Self, OnUpgrade)> {
        let transport = Self::for_version(req.version()).ok_or_else(|| {
            Error::capability(format!("{:?} cannot carry a tunnel", req.version()))
        })?;
        let on_upgrade = req
            .extensions_mut()
            .remove::<OnUpgrade>()
            .ok_or_else(|| Error::capability("connection cannot flush a tunnel handshake"))?;
        Ok((transport, on_upgrade))
    }
}

/// Client side of a taken-over connection
trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ClientStream for T {}

/// Open a tunnel for an admitted CONNECT request.
///
/// Returns the handshake response, or the panel when the connection cannot
/// carry a tunnel at all.
pub(super) async fn establish(
    service: Arc<ProxyService>,
    mut req: Request<Body>,
    admission: AdmissionRequest,
) -> Response<Body> {
    let (transport, on_upgrade) = match TunnelTransport::negotiate(&mut req) {
        Ok(negotiated) => negotiated,
        Err(e) => {
            debug!("[tunnel] {} refused: {}", admission.target(), e);
            return service.render_panel(req, &admission, Some(&e)).await;
        }
    };

    let session = TunnelSession {
        id: Uuid::new_v4(),
        service,
        admission,
    };
    debug!(
        "[tunnel] {} {:?} tunnel to {} for {:?}",
        session.id,
        transport,
        session.admission.target(),
        session.admission.user
    );
    tokio::spawn(session.run(transport, on_upgrade));

    Response::new(Body::empty())
}

struct TunnelSession {
    id: Uuid,
    service: Arc<ProxyService>,
    admission: AdmissionRequest,
}

impl TunnelSession {
    async fn run(self, transport: TunnelTransport, on_upgrade: OnUpgrade) {
        // Resolves once the 200 has been written
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                debug!("[tunnel] {} handshake not delivered: {}", self.id, e);
                return;
            }
        };

        let outbound = match dial(
            &self.admission.host,
            self.admission.port,
            self.service.dial_timeout,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => return self.fail(TokioIo::new(upgraded), e).await,
        };

        let traffic = match transport {
            TunnelTransport::Raw => self.raw_relay(upgraded, outbound).await,
            TunnelTransport::Streamed => Some(self.streamed_relay(upgraded, outbound).await),
        };

        if let Some(traffic) = traffic {
            debug!(
                "[tunnel] {} closed: {} up, {} down",
                self.id, traffic.upload, traffic.download
            );
            self.service
                .quota
                .update(&self.admission.user, traffic.total());
        }
    }

    /// Take over the socket, forward its read-ahead, then relay.
    ///
    /// `None` when the session failed before relaying.
    async fn raw_relay<O>(&self, upgraded: Upgraded, mut outbound: O) -> Option<Traffic>
    where
        O: AsyncRead + AsyncWrite + Unpin,
    {
        let (client, read_ahead) = match seize(upgraded) {
            Ok(seized) => seized,
            Err(upgraded) => {
                let e = Error::capability("connection cannot be taken over");
                self.fail(TokioIo::new(upgraded), e).await;
                return None;
            }
        };

        if !read_ahead.is_empty() {
            trace!("[tunnel] {} forwarding {} buffered bytes", self.id, read_ahead.len());
            let drained = async {
                outbound.write_all(&read_ahead).await?;
                outbound.flush().await
            };
            if let Err(e) = drained.await {
                self.fail(client, Error::Io(e)).await;
                return None;
            }
        }

        let (src, dst) = tokio::io::split(client);
        let mut traffic = relay(outbound, src, dst).await;
        traffic.upload += read_ahead.len() as u64;
        Some(traffic)
    }

    async fn streamed_relay(&self, upgraded: Upgraded, outbound: TcpStream) -> Traffic {
        let (src, dst) = tokio::io::split(TokioIo::new(upgraded));
        relay(outbound, src, dst).await
    }

    /// Write the panel into the open tunnel and close it
    async fn fail<S>(&self, downstream: S, error: Error)
    where
        S: AsyncWrite + Unpin,
    {
        debug!(
            "[tunnel] {} to {} failed: {}",
            self.id,
            self.admission.target(),
            error
        );

        let ctx = PanelContext::new(
            &self.admission,
            self.service.quota.format(&self.admission.user),
            Some(&error),
        );
        if let Err(e) = write_and_close(downstream, panel::render(&ctx).as_bytes()).await {
            trace!("[tunnel] {} failure page not delivered: {}", self.id, e);
        }
    }
}

/// Answer a CONNECT with the handshake and send `page` through the tunnel.
///
/// A 2xx answer to CONNECT carries no body, so this is how refused CONNECT
/// requests get to see the panel.
pub(super) fn deliver_page(on_upgrade: OnUpgrade, page: String) -> Response<Body> {
    tokio::spawn(async move {
        let delivered = match on_upgrade.await {
            Ok(upgraded) => write_and_close(TokioIo::new(upgraded), page.as_bytes()).await,
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        };
        if let Err(e) = delivered {
            trace!("[tunnel] panel not delivered: {}", e);
        }
    });

    Response::new(Body::empty())
}

async fn write_and_close<S>(mut downstream: S, page: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let written = tokio::time::timeout(FAIL_WRITE_TIMEOUT, async {
        downstream.write_all(page).await?;
        downstream.shutdown().await
    })
    .await;

    match written {
        Ok(result) => result,
        Err(_) => Err(io::ErrorKind::TimedOut.into()),
    }
}

/// Recover the socket hyper served and the bytes it had already read
fn seize(upgraded: Upgraded) -> std::result::Result<(Box<dyn ClientStream>, Bytes), Upgraded> {
    let upgraded = match upgraded.downcast::<TokioIo<TcpStream>>() {
        Ok(parts) => {
            let io: Box<dyn ClientStream> = Box::new(parts.io.into_inner());
            return Ok((io, parts.read_buf));
        }
        Err(upgraded) => upgraded,
    };

    match upgraded.downcast::<TokioIo<TlsStream<TcpStream>>>() {
        Ok(parts) => {
            let io: Box<dyn ClientStream> = Box::new(parts.io.into_inner());
            Ok((io, parts.read_buf))
        }
        Err(upgraded) => Err(upgraded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use http::Method;
    use http_body_util::Empty;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use parking_lot::Mutex;
    use std::convert::Infallible;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn session() -> TunnelSession {
        TunnelSession {
            id: Uuid::new_v4(),
            service: Arc::new(ProxyService::from_config(&Config::default()).unwrap()),
            admission: AdmissionRequest {
                method: Method::CONNECT,
                host: "example.com".to_string(),
                port: 443,
                user: "alice".to_string(),
                authenticated: true,
                allowed: true,
                within_quota: true,
            },
        }
    }

    /// Serve a CONNECT whose first tunnel bytes share the head's segment
    async fn upgraded_connect(read_ahead: &[u8]) -> (Upgraded, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let svc = service_fn(move |mut req: Request<Incoming>| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(hyper::upgrade::on(&mut req));
            }
            async { Ok::<_, Infallible>(Response::new(Empty::<Bytes>::new())) }
        });
        tokio::spawn(
            http1::Builder::new()
                .serve_connection(TokioIo::new(server), svc)
                .with_upgrades(),
        );

        let mut head = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n".to_vec();
        head.extend_from_slice(read_ahead);
        client.write_all(&head).await.unwrap();

        let upgraded = rx.await.unwrap().await.unwrap();
        (upgraded, client)
    }

    #[test]
    fn test_transport_for_version() {
        assert_eq!(TunnelTransport::for_version(Version::HTTP_11), Some(TunnelTransport::Raw));
        assert_eq!(TunnelTransport::for_version(Version::HTTP_10), Some(TunnelTransport::Raw));
        assert_eq!(
            TunnelTransport::for_version(Version::HTTP_2),
            Some(TunnelTransport::Streamed)
        );
        assert_eq!(TunnelTransport::for_version(Version::HTTP_3), None);
    }

    #[test]
    fn test_negotiate_without_upgrade_handle() {
        let mut req = Request::builder()
            .method(Method::CONNECT)
            .uri("example.com:443")
            .body(())
            .unwrap();
        let err = TunnelTransport::negotiate(&mut req).unwrap_err();
        assert!(matches!(err, Error::Capability(_)));
    }

    #[tokio::test]
    async fn test_read_ahead_failure_reports_into_tunnel() {
        let (upgraded, mut client) = upgraded_connect(b"HELLO").await;
        let outbound = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            .build();

        let traffic = session().raw_relay(upgraded, outbound).await;
        assert!(traffic.is_none());

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        let received = String::from_utf8_lossy(&received);
        assert!(received.starts_with("HTTP/1.1 200"), "unexpected: {}", received);
        assert!(received.contains("IO error: closed"));
    }

    #[tokio::test]
    async fn test_seize_returns_socket_and_read_ahead() {
        let (upgraded, _client) = upgraded_connect(b"HELLO").await;
        let (_io, read_ahead) = seize(upgraded).ok().unwrap();
        assert_eq!(&read_ahead[..], b"HELLO");
    }
}
