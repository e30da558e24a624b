// Copyright (C) 2025 Matías Salinas (support@fenden.com)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use hyper::{Body, Request, Response, StatusCode};
use metrics::counter;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, warn};
use url::Url;

use crate::cache::client::CacheClient;
use crate::codec::{self, CapturedResponse};
use crate::fingerprint::fingerprint;
use crate::tunnel;
use crate::upstream;
use crate::warc::writer::WarcWriter;

/// Statuses whose responses populate the cache. Other statuses are served
/// and archived but never stored.
pub const CACHEABLE_STATUSES: [u16; 6] = [200, 301, 302, 303, 307, 404];

/// The only upstream headers that travel back to the client. Everything
/// else survives in the WARC record but is dropped from this hop.
pub const CLIENT_HEADER_ALLOWLIST: [&str; 5] =
    ["Date", "Cache-Control", "Server", "Content-Type", "Location"];

/// Shared collaborators for request handling, built once at startup.
pub struct ProxyContext {
    pub cache: CacheClient,
    pub warc: Arc<WarcWriter>,
}

/// Entry point for every accepted request: GET and POST go through the
/// caching pipeline, CONNECT becomes a tunnel, anything else is a 405.
pub async fn handle(
    ctx: Arc<ProxyContext>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    match req.method().as_str() {
        "GET" | "POST" => Ok(proxy_request(ctx, req).await),
        "CONNECT" => Ok(tunnel::handle_connect(req).await),
        _ => Ok(method_not_allowed()),
    }
}

/// The per-request pipeline for GET and POST: fingerprint, cache lookup,
/// fetch on miss, conditional cache store, allow-list serve.
///
/// POST deliberately shares this path. The body is folded into the
/// fingerprint, which makes POSTs repeatable from the cache's point of
/// view; that is capture-proxy behavior, not general HTTP semantics.
pub async fn proxy_request(ctx: Arc<ProxyContext>, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let uri = parts.uri.to_string();

    let body = match hyper::body::to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("⚠️ Failed to read request body for '{}': {}", uri, e);
            return simple_response(StatusCode::BAD_REQUEST, "Bad request");
        }
    };

    let args = Url::parse(&uri)
        .map(|parsed| {
            parsed
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let key = fingerprint(&uri, parts.method.as_str(), &body, &args);

    let mut cached: Option<CapturedResponse> = None;
    if let Some(blob) = ctx.cache.get(&key).await {
        match codec::decode(&blob, &uri) {
            Ok(response) => {
                debug!("⚡ Cache hit for '{}'", uri);
                cached = Some(response);
            }
            Err(e) => {
                // Unreadable entries degrade to a miss; the refetch will
                // overwrite them.
                warn!("🧨 Discarding unreadable cache entry for '{}': {}", uri, e);
            }
        }
    }

    let from_cache = cached.is_some();
    if from_cache {
        counter!("cache_hits_total").increment(1);
    } else {
        counter!("cache_misses_total").increment(1);
    }

    let captured = match cached {
        Some(response) => response,
        None => {
            // The fetch runs on its own task so a client that hangs up
            // mid-flight does not cancel it; the response still gets
            // archived even when nobody is left to read it.
            let fetch = tokio::spawn(upstream::fetch(
                ctx.warc.clone(),
                parts.method.clone(),
                uri.clone(),
                parts.headers.clone(),
                body,
            ));
            match fetch.await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!("⛔ Upstream fetch failed for '{}': {}", uri, e);
                    return internal_error(&e.to_string());
                }
                Err(e) => {
                    error!("⛔ Fetch task for '{}' did not complete: {}", uri, e);
                    return internal_error("fetch task failed");
                }
            }
        }
    };

    if !from_cache && CACHEABLE_STATUSES.contains(&captured.code) {
        match codec::encode(&captured) {
            Ok(blob) => {
                // Fire and forget; a failed store only costs a refetch.
                let cache = ctx.cache.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    cache.set(&key, &blob).await;
                });
            }
            Err(e) => warn!("⚠️ Could not encode response for '{}': {}", uri, e),
        }
    }

    build_client_response(&captured)
}

/// Composes the hop to the client: captured status, allow-listed headers,
/// captured body.
pub fn build_client_response(response: &CapturedResponse) -> Response<Body> {
    let mut builder = Response::builder().status(
        StatusCode::from_u16(response.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );

    for name in CLIENT_HEADER_ALLOWLIST {
        if let Some(value) = response.header(name) {
            builder = builder.header(name, value);
        }
    }

    match builder.body(Body::from(response.body.clone())) {
        Ok(built) => built,
        Err(e) => {
            error!("⚠️ Failed to build client response: {}", e);
            simple_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// The synthetic 500 served when the upstream produced no response at all.
pub fn internal_error(detail: &str) -> Response<Body> {
    simple_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &format!("Internal server error:\n{detail}"),
    )
}

fn method_not_allowed() -> Response<Body> {
    match Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header("Allow", "GET, POST, CONNECT")
        .body(Body::from("Method not allowed"))
    {
        Ok(built) => built,
        Err(_) => simple_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
    }
}

fn simple_response(status: StatusCode, body: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
}
