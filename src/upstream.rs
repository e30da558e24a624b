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

use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use hyper::client::HttpConnector;
use hyper::{Body, Client, HeaderMap, Method, Request};
use metrics::counter;
use once_cell::sync::Lazy;
use std::error::Error;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{Duration, timeout};
use tracing::{error, warn};

use crate::codec::CapturedResponse;
use crate::config::CONFIG;
use crate::warc::writer::WarcWriter;

/// Shared HTTP client for all outbound requests. Redirects are not
/// followed; the captured response is whatever the origin answered.
static HTTP_CLIENT: Lazy<Client<HttpConnector>> = Lazy::new(|| {
    let connect_secs = CONFIG
        .get()
        .map(|c| c.upstream.connect_timeout_secs)
        .unwrap_or(50);
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(Duration::from_secs(connect_secs)));
    Client::builder().build(connector)
});

/// A fetch that produced no response at all. Status errors from the origin
/// are not errors here; they come back as ordinary captured responses.
#[derive(Debug)]
pub enum UpstreamError {
    /// The request could not be constructed from the client's input.
    BadRequest(String),
    /// Connect, write, or read failed.
    Transport(String),
    /// The whole-request deadline expired.
    Timeout(u64),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::BadRequest(msg) => write!(f, "invalid upstream request: {msg}"),
            UpstreamError::Transport(msg) => write!(f, "upstream request failed: {msg}"),
            UpstreamError::Timeout(secs) => {
                write!(f, "upstream request timed out after {secs}s")
            }
        }
    }
}

impl Error for UpstreamError {}

/// Performs the outgoing request and offers the completed response to the
/// WARC writer before handing it back.
///
/// Method, headers, and body pass through verbatim; the absolute-form
/// request URI is the target. The collected body is inflated when the
/// origin compressed it, and the `Transfer-Encoding` / `Content-Encoding`
/// headers are dropped so neither the archive nor the client ever sees
/// them. Archival failures are logged and do not fail the fetch.
pub async fn fetch(
    warc: Arc<WarcWriter>,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
) -> Result<CapturedResponse, UpstreamError> {
    let request_secs = CONFIG
        .get()
        .map(|c| c.upstream.request_timeout_secs)
        .unwrap_or(900);

    let mut builder = Request::builder().method(method).uri(url.as_str());
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    let request = builder
        .body(Body::from(body))
        .map_err(|e| UpstreamError::BadRequest(e.to_string()))?;

    let started = Instant::now();
    let (parts, raw_body) = match timeout(Duration::from_secs(request_secs), async {
        let response = HTTP_CLIENT.request(request).await?;
        let (parts, body) = response.into_parts();
        let bytes = hyper::body::to_bytes(body).await?;
        Ok::<_, hyper::Error>((parts, bytes))
    })
    .await
    {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => {
            counter!("upstream_errors_total").increment(1);
            warn!("⛔ Request to '{}' failed: {}", url, e);
            return Err(UpstreamError::Transport(e.to_string()));
        }
        Err(_) => {
            counter!("upstream_errors_total").increment(1);
            warn!("⏱ Timeout after {}s for '{}'", request_secs, url);
            return Err(UpstreamError::Timeout(request_secs));
        }
    };
    let request_time = started.elapsed().as_secs_f64();

    let mut headers_vec = parts
        .headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).to_string(),
            )
        })
        .collect::<Vec<_>>();

    // hyper de-chunks but leaves content codings alone; finish the job so
    // the archived and served body is the plain representation.
    let encoding = headers_vec
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-encoding"))
        .map(|(_, value)| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let body = decode_body(&encoding, raw_body, &url);
    headers_vec.retain(|(name, _)| {
        !name.eq_ignore_ascii_case("transfer-encoding")
            && !name.eq_ignore_ascii_case("content-encoding")
    });

    let captured = CapturedResponse {
        code: parts.status.as_u16(),
        effective_url: url.clone(),
        request_url: url,
        headers: headers_vec,
        body,
        request_time,
        time_info: vec![("total".to_string(), request_time)],
    };

    if let Err(e) = warc
        .write_record(
            &captured.headers,
            &captured.body,
            &captured.effective_url,
            captured.code,
        )
        .await
    {
        error!(
            "⚠️ Failed to archive '{}': {}",
            captured.effective_url, e
        );
    }

    Ok(captured)
}

/// Inflates a gzip or deflate body. Unknown codings and inflate failures
/// pass the bytes through untouched.
fn decode_body(encoding: &str, raw: Bytes, url: &str) -> Bytes {
    match encoding {
        "" | "identity" => raw,
        "gzip" | "x-gzip" => {
            let mut inflated = Vec::new();
            match GzDecoder::new(raw.as_ref()).read_to_end(&mut inflated) {
                Ok(_) => Bytes::from(inflated),
                Err(e) => {
                    warn!("⚠️ Failed to inflate gzip body from '{}': {}", url, e);
                    raw
                }
            }
        }
        "deflate" => {
            let mut inflated = Vec::new();
            match ZlibDecoder::new(raw.as_ref()).read_to_end(&mut inflated) {
                Ok(_) => Bytes::from(inflated),
                Err(e) => {
                    warn!("⚠️ Failed to inflate deflate body from '{}': {}", url, e);
                    raw
                }
            }
        }
        other => {
            warn!(
                "⚠️ Unsupported content encoding '{}' from '{}', passing body through",
                other, url
            );
            raw
        }
    }
}
