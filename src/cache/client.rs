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
use deadpool::managed::{self, Metrics, Object, Pool, RecycleError, RecycleResult};
use std::error::Error;
use std::fmt;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use crate::config::CacheSettings;

/// An error talking to the memcached store. None of these ever reach a
/// client: a failing get is a miss, a failing set is logged and dropped.
#[derive(Debug)]
pub enum CacheError {
    /// Could not obtain a pooled connection.
    Pool(String),
    /// An error communicating over the wire.
    Io(io::Error),
    /// The server replied with something the text protocol does not allow.
    Protocol(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Pool(msg) => write!(f, "connection pool error: {msg}"),
            CacheError::Io(err) => write!(f, "cache i/o error: {err}"),
            CacheError::Protocol(msg) => write!(f, "cache protocol error: {msg}"),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        CacheError::Io(err)
    }
}

/// A single memcached text-protocol connection.
pub struct CacheConnection {
    stream: BufStream<TcpStream>,
}

impl CacheConnection {
    async fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream: BufStream::new(stream),
        })
    }

    async fn read_line(&mut self) -> Result<String, CacheError> {
        let mut line = String::new();
        let n = self.stream.read_line(&mut line).await?;
        if n == 0 {
            return Err(CacheError::Protocol("connection closed by server".into()));
        }
        Ok(line.trim_end().to_string())
    }

    /// `get <key>` round trip. `Ok(None)` is a miss.
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.stream
            .write_all(format!("get {key}\r\n").as_bytes())
            .await?;
        self.stream.flush().await?;

        let header = self.read_line().await?;
        if header == "END" {
            return Ok(None);
        }

        // VALUE <key> <flags> <bytes>
        let len = header
            .strip_prefix("VALUE ")
            .and_then(|rest| rest.split_whitespace().nth(2))
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| CacheError::Protocol(format!("unexpected reply: {header}")))?;

        let mut data = vec![0u8; len + 2];
        self.stream.read_exact(&mut data).await?;
        data.truncate(len); // drop the trailing \r\n

        let tail = self.read_line().await?;
        if tail != "END" {
            return Err(CacheError::Protocol(format!("missing END, got: {tail}")));
        }

        Ok(Some(data))
    }

    /// `set <key> 0 0 <len>` round trip. Values never expire from our side;
    /// eviction belongs to the store.
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.stream
            .write_all(format!("set {key} 0 0 {}\r\n", value.len()).as_bytes())
            .await?;
        self.stream.write_all(value).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;

        let reply = self.read_line().await?;
        if reply != "STORED" {
            return Err(CacheError::Protocol(format!("set not stored: {reply}")));
        }
        Ok(())
    }

    /// Cheap liveness probe used when a pooled connection is recycled.
    async fn ping(&mut self) -> Result<(), CacheError> {
        self.stream.write_all(b"version\r\n").await?;
        self.stream.flush().await?;
        let reply = self.read_line().await?;
        if reply.starts_with("VERSION") {
            Ok(())
        } else {
            Err(CacheError::Protocol(format!("bad version reply: {reply}")))
        }
    }
}

/// deadpool manager that dials the configured memcached server.
#[derive(Debug)]
pub struct CacheManager {
    addr: String,
}

impl managed::Manager for CacheManager {
    type Type = CacheConnection;
    type Error = io::Error;

    async fn create(&self) -> Result<CacheConnection, Self::Error> {
        CacheConnection::connect(&self.addr).await
    }

    async fn recycle(
        &self,
        conn: &mut CacheConnection,
        _: &Metrics,
    ) -> RecycleResult<Self::Error> {
        match conn.ping().await {
            Ok(()) => Ok(()),
            Err(CacheError::Io(err)) => Err(RecycleError::Backend(err)),
            Err(other) => Err(RecycleError::Message(other.to_string().into())),
        }
    }
}

/// Async get/set against the external store through a bounded connection
/// pool. Every operation is a single round trip on one pooled connection,
/// bounded by the configured per-op timeout.
#[derive(Clone)]
pub struct CacheClient {
    pool: Pool<CacheManager>,
    op_timeout: Duration,
}

impl CacheClient {
    pub fn new(settings: &CacheSettings) -> Result<Self, CacheError> {
        let manager = CacheManager {
            addr: settings.addr.clone(),
        };
        let pool = Pool::builder(manager)
            .max_size(settings.max_connections)
            .build()
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        Ok(Self {
            pool,
            op_timeout: Duration::from_millis(settings.op_timeout_ms),
        })
    }

    /// Looks up a key. Miss, network error, protocol error, and timeout all
    /// come back as `None`; the caller cannot tell them apart and is not
    /// supposed to.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        match timeout(self.op_timeout, self.get_inner(key)).await {
            Ok(Ok(value)) => value.map(Bytes::from),
            Ok(Err(e)) => {
                warn!("⚠️ Cache get failed for '{}': {}", key, e);
                None
            }
            Err(_) => {
                warn!("⏱ Cache get timed out for '{}'", key);
                None
            }
        }
    }

    /// Stores a value. Failures are logged and swallowed; the response this
    /// entry was made from has already been served.
    pub async fn set(&self, key: &str, value: &[u8]) {
        match timeout(self.op_timeout, self.set_inner(key, value)).await {
            Ok(Ok(())) => debug!("✅ Stored key '{}' in cache", key),
            Ok(Err(e)) => warn!("⚠️ Cache set failed for '{}': {}", key, e),
            Err(_) => warn!("⏱ Cache set timed out for '{}'", key),
        }
    }

    async fn get_inner(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;
        match conn.get(key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                // A connection that errored mid-protocol has unknown
                // buffered state; drop it instead of returning it.
                let _ = Object::take(conn);
                Err(e)
            }
        }
    }

    async fn set_inner(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;
        match conn.set(key, value).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = Object::take(conn);
                Err(e)
            }
        }
    }
}
