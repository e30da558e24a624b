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

use chrono::{Local, Utc};
use dashmap::DashMap;
use md5::{Digest, Md5};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::warc::record::{WarcRecord, build_http_payload};

#[derive(Debug)]
pub struct WarcWriteError(io::Error);

impl fmt::Display for WarcWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "warc write failed: {}", self.0)
    }
}

impl Error for WarcWriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

impl From<io::Error> for WarcWriteError {
    fn from(err: io::Error) -> Self {
        WarcWriteError(err)
    }
}

// Last two dot-labels of a hostname. Multi-label public suffixes like
// co.uk collapse to the suffix itself; a public-suffix list would be the
// fix if grouping fidelity ever matters.
static HOST_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^.]+\.[^.]+$").expect("host suffix pattern is valid")
});

/// Grouping key for WARC files: the registrable suffix of the URL's host.
/// IP-address hosts are kept whole; unparseable URLs fall into a shared
/// `unknown` slot.
pub fn registrable_suffix(url: &str) -> String {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return "unknown".to_string(),
    };
    match parsed.host() {
        Some(url::Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            HOST_SUFFIX
                .find(&domain)
                .map(|m| m.as_str().to_string())
                .unwrap_or(domain)
        }
        Some(url::Host::Ipv4(ip)) => ip.to_string(),
        // colons are not filename safe
        Some(url::Host::Ipv6(ip)) => ip.to_string().replace(':', "-"),
        None => "unknown".to_string(),
    }
}

/// Persistent key-only set backing URL de-duplication: an in-memory set
/// mirrored by one hex key per line in `index.db`. The file is truncated
/// on every writer init, so de-duplication is per capture session.
struct UrlIndex {
    inner: StdMutex<IndexInner>,
}

struct IndexInner {
    seen: HashSet<String>,
    file: File,
}

impl UrlIndex {
    fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: StdMutex::new(IndexInner {
                seen: HashSet::new(),
                file,
            }),
        })
    }

    /// Inserts a key. Returns `false` when it was already present. The key
    /// hits the in-memory set before any file I/O, so a concurrent second
    /// insert of the same key observes the duplicate immediately.
    fn insert(&self, key: &str) -> io::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.seen.insert(key.to_string()) {
            return Ok(false);
        }
        inner.file.write_all(key.as_bytes())?;
        inner.file.write_all(b"\n")?;
        inner.file.flush()?;
        Ok(true)
    }
}

/// The open-file state of one registrable host. `file == None` means the
/// next record opens `<host>_<seq + 1>.warc.gz`.
struct HostSlot {
    host: String,
    seq: u32,
    file: Option<File>,
}

impl HostSlot {
    fn new(host: String) -> Self {
        Self {
            host,
            seq: 0,
            file: None,
        }
    }

    fn append(&mut self, record: &WarcRecord, dir: &Path, cap: u64) -> io::Result<()> {
        let file = match &mut self.file {
            Some(file) => file,
            slot => {
                self.seq += 1;
                let path = dir.join(format!("{}_{}.warc.gz", self.host, self.seq));
                debug!("📂 Opening WARC file {:?}", path);
                slot.insert(OpenOptions::new().create(true).append(true).open(&path)?)
            }
        };

        record.write_gzipped(&mut *file)?;

        let position = file.stream_position()?;
        if position > cap {
            info!(
                "🔄 WARC file for '{}' reached {} bytes, rotating",
                self.host, position
            );
            self.file = None;
        }
        Ok(())
    }
}

/// Appends response records to per-host rotating `.warc.gz` files and
/// skips URLs that were already archived this session.
///
/// Constructed once at startup. Writes to the same host are serialized by
/// that host's slot lock; distinct hosts write in parallel.
pub struct WarcWriter {
    session_dir: PathBuf,
    warc_dir: PathBuf,
    warc_date: String,
    max_file_bytes: u64,
    index: UrlIndex,
    slots: DashMap<String, Arc<Mutex<HostSlot>>>,
}

impl WarcWriter {
    /// Creates `<outdir>/<timestamp>/{warc,db_index}`, truncates the URL
    /// index, and records the UTC birth time stamped on every record this
    /// process emits.
    pub fn init(outdir: &Path, max_file_bytes: u64) -> Result<Self, WarcWriteError> {
        let session = Local::now().format("%Y-%m-%d_%H:%M:%S").to_string();
        let session_dir = outdir.join(session);
        let warc_dir = session_dir.join("warc");
        let db_index_dir = session_dir.join("db_index");
        fs::create_dir_all(&warc_dir)?;
        fs::create_dir_all(&db_index_dir)?;

        let index = UrlIndex::create(&db_index_dir.join("index.db"))?;
        let warc_date = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        info!("🗃 WARC capture session at {:?}", session_dir);

        Ok(Self {
            session_dir,
            warc_dir,
            warc_date,
            max_file_bytes,
            index,
            slots: DashMap::new(),
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn warc_dir(&self) -> &Path {
        &self.warc_dir
    }

    pub fn warc_date(&self) -> &str {
        &self.warc_date
    }

    /// Archives one response. The URL is hashed into the dedup index
    /// first; a URL seen before in this session returns without writing.
    /// `headers` must already be free of transfer and content encodings;
    /// the body goes in verbatim.
    pub async fn write_record(
        &self,
        headers: &[(String, String)],
        body: &[u8],
        effective_url: &str,
        status_code: u16,
    ) -> Result<(), WarcWriteError> {
        let url_hash = hex::encode(Md5::digest(effective_url.as_bytes()));
        if !self.index.insert(&url_hash)? {
            counter!("warc_duplicates_total").increment(1);
            debug!("↩️ Already archived '{}', skipping", effective_url);
            return Ok(());
        }

        let content_type = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
            .unwrap_or("");

        let payload = build_http_payload(status_code, headers, body);
        let record = WarcRecord::response(effective_url, content_type, &self.warc_date, payload);

        let host = registrable_suffix(effective_url);
        let slot = {
            let entry = self
                .slots
                .entry(host.clone())
                .or_insert_with(|| Arc::new(Mutex::new(HostSlot::new(host))));
            entry.value().clone()
        };

        let mut slot = slot.lock().await;
        slot.append(&record, &self.warc_dir, self.max_file_bytes)?;
        counter!("warc_records_total").increment(1);
        Ok(())
    }

    /// Drops every open file handle. Records are flushed as they are
    /// written, so this only releases descriptors at shutdown.
    pub async fn close(&self) {
        for entry in self.slots.iter() {
            let mut slot = entry.value().lock().await;
            slot.file = None;
        }
        info!("🗃 WARC writer closed");
    }
}
