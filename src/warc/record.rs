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

use flate2::{Compression, write::GzEncoder};
use hyper::StatusCode;
use std::io::{self, Write};
use uuid::Uuid;

/// Reason phrase from the standard table, or `-` for codes it does not
/// cover.
pub fn reason_phrase(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("-")
}

/// Reconstructs the HTTP/1.1 response a record archives: status line,
/// headers, blank line, body. The body bytes go in exactly as captured.
pub fn build_http_payload(code: u16, headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", code, reason_phrase(code));
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push('\n');
    }
    head.push_str("\r\n");

    let mut payload = head.into_bytes();
    payload.extend_from_slice(body);
    payload
}

/// A single WARC 1.0 record: named headers plus payload.
#[derive(Debug)]
pub struct WarcRecord {
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl WarcRecord {
    /// Builds a `response`-type record. `date` is the writer's birth time,
    /// shared by every record of the capture session.
    pub fn response(target_uri: &str, content_type: &str, date: &str, payload: Vec<u8>) -> Self {
        let headers = vec![
            ("WARC-Type".to_string(), "response".to_string()),
            (
                "WARC-Record-ID".to_string(),
                format!("<urn:uuid:{}>", Uuid::new_v4()),
            ),
            ("WARC-Date".to_string(), date.to_string()),
            ("Content-Length".to_string(), payload.len().to_string()),
            ("Content-Type".to_string(), content_type.to_string()),
            ("WARC-Target-URI".to_string(), target_uri.to_string()),
        ];
        Self { headers, payload }
    }

    /// Serializes the record: version line, headers, blank line, payload,
    /// and the two terminating CRLFs the format requires between records.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = String::from("WARC/1.0\r\n");
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    /// Appends the record to `out` as its own gzip member, so readers can
    /// seek record boundaries with a multi-member decoder.
    pub fn write_gzipped<W: Write>(&self, out: W) -> io::Result<()> {
        let mut encoder = GzEncoder::new(out, Compression::default());
        encoder.write_all(&self.to_bytes())?;
        encoder.finish()?;
        Ok(())
    }
}
