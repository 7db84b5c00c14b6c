//! Forward dispatch and reverse-proxy engine

use super::AdmissionRequest;
use crate::common::net::join_host_port;
use crate::{Error, Result};
use axum::body::Body;
use http::header::{HeaderName, CONNECTION, HOST};
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Uri, Version};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use tracing::debug;

/// How much of the request is rewritten before it goes upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Absolute target URI and matching `Host`
    Rewrite,
    /// Scheme and authority only; `Host` stays as the client sent it
    Passthrough,
}

/// Pooled HTTP(S) reverse proxy
#[derive(Clone)]
pub struct ReverseProxy {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl ReverseProxy {
    pub fn new() -> Result<Self> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .build();

        Ok(ReverseProxy {
            client: Client::builder(TokioExecutor::new()).build(connector),
        })
    }

    /// Send `req` to `target` and relay the upstream response.
    ///
    /// Upstream failures become `502 Bad Gateway`.
    pub async fn forward(&self, mut req: Request<Body>, target: &Uri, mode: ForwardMode) -> Response<Body> {
        let uri = match mode {
            ForwardMode::Rewrite => target.clone(),
            ForwardMode::Passthrough => match passthrough_uri(target, req.uri()) {
                Ok(uri) => uri,
                Err(e) => {
                    debug!("[forward] bad fallback target {}: {}", target, e);
                    return bad_gateway();
                }
            },
        };

        if mode == ForwardMode::Rewrite {
            if let Some(value) = uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            {
                req.headers_mut().insert(HOST, value);
            }
        }

        *req.uri_mut() = uri;
        *req.version_mut() = Version::HTTP_11;
        strip_hop_by_hop(req.headers_mut());

        debug!("[forward] {} {}", req.method(), req.uri());
        match self.client.request(req).await {
            Ok(resp) => {
                let mut resp = resp.map(Body::new);
                strip_hop_by_hop(resp.headers_mut());
                resp
            }
            Err(e) => {
                debug!("[forward] upstream failed: {}", e);
                bad_gateway()
            }
        }
    }
}

/// Forward an admitted non-CONNECT request
pub(super) async fn dispatch(
    proxy: &ReverseProxy,
    req: Request<Body>,
    admission: &AdmissionRequest,
) -> Response<Body> {
    match upstream_uri(req.uri(), &admission.host, admission.port) {
        Ok(target) => proxy.forward(req, &target, ForwardMode::Rewrite).await,
        Err(e) => {
            debug!("[forward] cannot build upstream uri: {}", e);
            plain(StatusCode::BAD_REQUEST, "Bad Request")
        }
    }
}

/// Fill in a missing scheme (`http`) and authority (`host:port`)
pub fn upstream_uri(uri: &Uri, host: &str, port: u16) -> Result<Uri> {
    let mut parts = uri.clone().into_parts();
    if parts.scheme.is_none() {
        parts.scheme = Some(Scheme::HTTP);
    }
    if parts.authority.is_none() {
        let authority: Authority = join_host_port(host, port)
            .parse()
            .map_err(|e| Error::http(format!("invalid authority {}: {}", host, e)))?;
        parts.authority = Some(authority);
    }
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    Uri::from_parts(parts).map_err(|e| Error::http(e.to_string()))
}

/// Target scheme and authority, target path joined with the request path
pub fn passthrough_uri(target: &Uri, uri: &Uri) -> Result<Uri> {
    let path = join_paths(target.path(), uri.path());
    let path_and_query = match (target.query(), uri.query()) {
        (Some(a), Some(b)) => format!("{}?{}&{}", path, a, b),
        (Some(q), None) | (None, Some(q)) => format!("{}?{}", path, q),
        (None, None) => path,
    };

    let mut builder = Uri::builder().path_and_query(path_and_query);
    if let Some(scheme) = target.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = target.authority() {
        builder = builder.authority(authority.clone());
    }
    builder.build().map_err(|e| Error::http(e.to_string()))
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Remove hop-by-hop headers, including those named by `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    for name in [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ] {
        headers.remove(name);
    }
}

fn bad_gateway() -> Response<Body> {
    plain(StatusCode::BAD_GATEWAY, "Bad Gateway")
}

fn plain(status: StatusCode, text: &'static str) -> Response<Body> {
    let mut resp = Response::new(Body::from(text));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
