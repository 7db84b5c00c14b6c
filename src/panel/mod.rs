//! Administrative fallback surface
//!
//! A small axum router rendered in-process for requests that are not
//! proxied. `GET /api/status` returns the request context as JSON, every
//! other request gets the HTML status page.

use crate::proxy::AdmissionRequest;
use crate::{Error, VERSION};
use axum::{
    body::Body,
    extract::Extension,
    http::{Request, Response},
    response::Html,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

/// What the panel knows about the request it renders for
#[derive(Debug, Clone, Serialize)]
pub struct PanelContext {
    pub user: String,
    pub quota: String,
    pub method: String,
    pub host: String,
    pub port: u16,
    pub authenticated: bool,
    pub allowed: bool,
    pub within_quota: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PanelContext {
    pub fn new(admission: &AdmissionRequest, quota: String, error: Option<&Error>) -> Self {
        PanelContext {
            user: admission.user.clone(),
            quota,
            method: admission.method.to_string(),
            host: admission.host.clone(),
            port: admission.port,
            authenticated: admission.authenticated,
            allowed: admission.allowed,
            within_quota: admission.within_quota,
            error: error.map(|e| e.to_string()),
        }
    }
}

/// Panel router
#[derive(Clone)]
pub struct Panel {
    router: Router,
}

impl Panel {
    pub fn new() -> Self {
        let router = Router::new()
            .route("/api/status", get(status))
            .route("/api/version", get(version))
            .fallback(page)
            .layer(TraceLayer::new_for_http());

        Panel { router }
    }

    /// Render the panel for `req`
    pub async fn respond(&self, mut req: Request<Body>, ctx: PanelContext) -> Response<Body> {
        req.extensions_mut().insert(ctx);
        match self.router.clone().oneshot(req).await {
            Ok(resp) => resp,
            Err(never) => match never {},
        }
    }
}

impl Default for Panel {
    fn default() -> Self {
        Self::new()
    }
}

/// GET /api/status
async fn status(Extension(ctx): Extension<PanelContext>) -> Json<PanelContext> {
    Json(ctx)
}

/// GET /api/version
async fn version() -> Json<Value> {
    Json(json!({ "version": VERSION }))
}

async fn page(Extension(ctx): Extension<PanelContext>) -> Html<String> {
    Html(render(&ctx))
}

/// HTML status page
pub fn render(ctx: &PanelContext) -> String {
    let mut rows = String::new();
    let user = if ctx.user.is_empty() { "-" } else { ctx.user.as_str() };
    let target = crate::common::net::join_host_port(&ctx.host, ctx.port);
    let fields: [(&str, &str); 4] = [
        ("User", user),
        ("Quota", &ctx.quota),
        ("Method", &ctx.method),
        ("Target", &target),
    ];
    for (name, value) in fields {
        let _ = write!(rows, "<tr><th>{}</th><td>{}</td></tr>", name, escape(value));
    }
    for (name, ok) in [
        ("Authenticated", ctx.authenticated),
        ("Allowed", ctx.allowed),
        ("Within quota", ctx.within_quota),
    ] {
        let _ = write!(
            rows,
            "<tr><th>{}</th><td class=\"{}\">{}</td></tr>",
            name,
            if ok { "ok" } else { "no" },
            if ok { "yes" } else { "no" }
        );
    }

    let error = match &ctx.error {
        Some(e) => format!("<p class=\"error\">{}</p>", escape(e)),
        None => String::new(),
    };

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>wicklight</title>\
         <style>body{{font-family:sans-serif;margin:2em}}th{{text-align:left;padding-right:1em}}\
         .ok{{color:#080}}.no{{color:#a00}}.error{{color:#a00;font-weight:bold}}</style></head>\
         <body><h1>wicklight</h1>{}<table>{}</table><footer>v{}</footer></body></html>\n",
        error, rows, VERSION
    )
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
