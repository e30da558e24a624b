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

use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::{error::Error, fs};

/// Connection settings for the external memcached store.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    /// `host:port` of the memcached server.
    #[serde(default = "default_cache_addr")]
    pub addr: String,

    /// Upper bound on pooled connections to the store.
    #[serde(default = "default_cache_max_connections")]
    pub max_connections: usize,

    /// Per-operation deadline in milliseconds. A get that misses this
    /// deadline is reported as a cache miss.
    #[serde(default = "default_cache_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

/// Timeouts applied to outgoing requests.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request deadline in seconds, connect included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Settings for the WARC archive output.
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveSettings {
    /// Root directory for capture sessions. Each run creates a fresh
    /// timestamped directory underneath.
    #[serde(default = "default_archive_outdir")]
    pub outdir: String,

    /// Soft cap per WARC file in MiB; the last record may push a file
    /// slightly over before it rotates.
    #[serde(default = "default_archive_max_file_mb")]
    pub max_file_mb: u64,
}

/// Main configuration structure loaded from a YAML file.
/// Every field carries a default, so an empty or absent file yields a
/// runnable configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Port the proxy listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Memcached connection settings.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Outgoing request timeouts.
    #[serde(default)]
    pub upstream: UpstreamSettings,

    /// WARC output settings.
    #[serde(default)]
    pub archive: ArchiveSettings,

    /// Port for the Prometheus metrics exporter. 0 disables it.
    #[serde(default)]
    pub metrics_port: u16,
}

/// Default port for proxy traffic
fn default_listen_port() -> u16 {
    8888
}

fn default_cache_addr() -> String {
    "127.0.0.1:11211".to_string()
}

fn default_cache_max_connections() -> usize {
    5000
}

fn default_cache_op_timeout_ms() -> u64 {
    2000
}

fn default_connect_timeout_secs() -> u64 {
    50
}

fn default_request_timeout_secs() -> u64 {
    900
}

fn default_archive_outdir() -> String {
    "result".to_string()
}

fn default_archive_max_file_mb() -> u64 {
    100
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            addr: default_cache_addr(),
            max_connections: default_cache_max_connections(),
            op_timeout_ms: default_cache_op_timeout_ms(),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            outdir: default_archive_outdir(),
            max_file_mb: default_archive_max_file_mb(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            cache: CacheSettings::default(),
            upstream: UpstreamSettings::default(),
            archive: ArchiveSettings::default(),
            metrics_port: 0,
        }
    }
}

/// Global, lazily-initialized config object shared across the application.
pub static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    /// Parses configuration from a YAML file.
    ///
    /// # Arguments
    /// - `path`: File path to the config YAML (e.g., "config.yaml").
    ///
    /// # Returns
    /// - `Ok(Config)` if parsing is successful.
    /// - `Err(Box<dyn Error>)` if the file is missing, malformed, or invalid.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn Error>> {
        // Load the file contents as a string
        let contents = fs::read_to_string(path)?;
        // Deserialize YAML into the Config struct
        let parsed: Config = serde_yaml::from_str(&contents)?;

        if parsed.cache.addr.trim().is_empty() {
            return Err("cache.addr is required and cannot be empty.".into());
        }

        if parsed.cache.max_connections == 0 {
            return Err("cache.max_connections must be at least 1.".into());
        }

        if parsed.archive.outdir.trim().is_empty() {
            return Err("archive.outdir is required and cannot be empty.".into());
        }

        if parsed.archive.max_file_mb == 0 {
            return Err("archive.max_file_mb must be at least 1.".into());
        }

        if parsed.upstream.request_timeout_secs == 0 {
            return Err("upstream.request_timeout_secs must be at least 1.".into());
        }

        Ok(parsed)
    }
}
