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

use sha1::{Digest, Sha1};
use url::Url;

/// Rewrites a URL into its canonical form so that equivalent requests hash
/// to the same cache key:
/// - scheme and host are lowercased
/// - default ports are dropped
/// - query parameters are sorted by name (equal names keep their original
///   value order)
/// - path percent-encoding is left untouched
///
/// Returns `None` when the input does not parse as an absolute URL.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    // The url crate already lowercases scheme/host and omits default ports
    // when serializing; only the query ordering is ours to fix.
    let parsed = Url::parse(raw).ok()?;

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    // Stable sort keeps the original order of repeated names
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut canonical = parsed;
    if pairs.is_empty() {
        canonical.set_query(None);
    } else {
        canonical
            .query_pairs_mut()
            .clear()
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    Some(canonical.to_string())
}

/// Computes the deterministic identity of a request as a lowercase hex
/// SHA-1 digest over, in order: the canonicalized URL, the uppercased
/// method, the raw body, and each query argument (sorted by name) as
/// `name || value`.
///
/// Two requests that differ only in query-parameter order share a
/// fingerprint; requests that differ in method or body do not. The function
/// is pure: same inputs, same digest, no side effects.
pub fn fingerprint(url: &str, method: &str, body: &[u8], args: &[(String, String)]) -> String {
    // An unparseable URL still gets a stable key; the fetch path will
    // surface the real error to the client.
    let canonical = canonicalize_url(url).unwrap_or_else(|| url.to_string());

    let mut sorted: Vec<&(String, String)> = args.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha1::new();
    hasher.update(canonical.as_bytes());
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(body);
    for (name, value) in sorted {
        hasher.update(name.as_bytes());
        hasher.update(value.as_bytes());
    }

    hex::encode(hasher.finalize())
}
