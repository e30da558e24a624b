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

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::io::{Read, Write};

/// A fully buffered upstream response as captured by the fetcher.
///
/// `headers` keeps the wire order; lookups through [`CapturedResponse::header`]
/// are case-insensitive. `request_url` is the URL the client asked this
/// proxy for and is rebound on every decode, so handlers always see the URL
/// they requested even when the entry was written by another request.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub code: u16,
    pub effective_url: String,
    pub request_url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub request_time: f64,
    pub time_info: Vec<(String, f64)>,
}

impl CapturedResponse {
    /// First header value matching `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Serialized layout of a captured response: body as base64, everything
/// else native JSON. The document is gzipped before it goes to the store.
#[derive(Serialize, Deserialize)]
struct ResponseBlob {
    code: u16,
    effective_url: String,
    headers: Vec<(String, String)>,
    body: String,
    request_time: f64,
    time_info: Vec<(String, f64)>,
}

#[derive(Debug)]
pub struct EncodeError(pub String);

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to encode response: {}", self.0)
    }
}

impl Error for EncodeError {}

/// Raised when a cached blob is truncated, of an unknown shape, or
/// otherwise unreadable. The handler treats this as a cache miss.
#[derive(Debug)]
pub struct DecodeError(pub String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to decode cached response: {}", self.0)
    }
}

impl Error for DecodeError {}

/// Serializes a captured response into the opaque blob stored in the cache.
/// The encoding round-trips every captured field across process restarts of
/// the same build.
pub fn encode(response: &CapturedResponse) -> Result<Vec<u8>, EncodeError> {
    let blob = ResponseBlob {
        code: response.code,
        effective_url: response.effective_url.clone(),
        headers: response.headers.clone(),
        body: STANDARD.encode(&response.body),
        request_time: response.request_time,
        time_info: response.time_info.clone(),
    };

    let json = serde_json::to_vec(&blob).map_err(|e| EncodeError(e.to_string()))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| EncodeError(e.to_string()))?;
    encoder.finish().map_err(|e| EncodeError(e.to_string()))
}

/// Reconstructs a captured response from a cache blob, binding
/// `request_url` to the originating request.
pub fn decode(blob: &[u8], request_url: &str) -> Result<CapturedResponse, DecodeError> {
    let mut decoder = GzDecoder::new(blob);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| DecodeError(format!("corrupt blob: {e}")))?;

    let parsed: ResponseBlob =
        serde_json::from_slice(&json).map_err(|e| DecodeError(format!("malformed blob: {e}")))?;

    let body = STANDARD
        .decode(&parsed.body)
        .map_err(|e| DecodeError(format!("bad body encoding: {e}")))?;

    Ok(CapturedResponse {
        code: parsed.code,
        effective_url: parsed.effective_url,
        request_url: request_url.to_string(),
        headers: parsed.headers,
        body: Bytes::from(body),
        request_time: parsed.request_time,
        time_info: parsed.time_info,
    })
}
