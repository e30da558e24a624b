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

// ----------------------
// External dependencies
// ----------------------
use hyper::Server; // Hyper: High-performance HTTP server
use hyper::service::{make_service_fn, service_fn};
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::{net::SocketAddr, process::exit}; // Network + system utilities

use clap::Parser; // CLI argument parsing
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info}; // Structured logging macros
use tracing_subscriber::EnvFilter; // Log filtering via LOG_LEVEL

// ----------------------
// Internal dependencies
// ----------------------
use warcbolt::cache::client::CacheClient;
use warcbolt::config::{CONFIG, Config};
use warcbolt::proxy::{self, ProxyContext};
use warcbolt::warc::writer::WarcWriter;

/// ----------------------------
/// CLI ARGUMENT STRUCTURE
/// ----------------------------
/// A single optional positional argument selects the listening port;
/// everything else lives in the YAML config file.
#[derive(Parser, Debug)]
#[command(
    name = "WarcBolt",
    version = "0.1.0",
    author = "Matías Salinas Contreras <support@fenden.com>",
    about = "Archiving forward proxy with memcached-backed response caching",
    long_about = Some(
        "WarcBolt is a forward HTTP proxy for web-capture workloads: \
        GET/POST responses are cached in memcached and every upstream \
        response is archived into rotating per-host WARC files. CONNECT \
        requests are tunneled untouched.\n\n\
        Author: Matías Salinas Contreras <support@fenden.com>\n\
        Version: 0.1.0"
    )
)]
struct Args {
    /// Listening port for proxy traffic (overrides the config file)
    port: Option<u16>,

    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

/// ----------------------------
/// LOGGING INITIALIZATION
/// ----------------------------
/// Initializes structured logging using the `LOG_LEVEL` environment variable.
/// Falls back to "info" if not set.
fn init_logging() {
    let filter = EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter) // Uses LOG_LEVEL to filter verbosity
        .with_target(false) // Hides the module path in each log line
        .compact() // Compact single-line logs (less verbose)
        .init();
}

/// ---------------------------
/// APPLICATION ENTRY POINT
/// ---------------------------
/// Loads configuration, constructs the WARC writer and cache pool, and
/// serves proxy traffic until a shutdown signal arrives.
#[tokio::main(flavor = "multi_thread")]
async fn main() {
    // ------------------------------------------------------
    // 1. Parse CLI arguments and initialize the logger
    // ------------------------------------------------------
    let args = Args::parse();
    init_logging();

    // ------------------------------------------------------
    // 2. Load configuration; a missing file means defaults
    // ------------------------------------------------------
    let mut config = if Path::new(&args.config).exists() {
        match Config::from_file(&args.config) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("❌ Failed to load config from '{}': {e}", args.config);
                exit(1);
            }
        }
    } else {
        info!("ℹ️ No config file at '{}', using defaults", args.config);
        Config::default()
    };

    if let Some(port) = args.port {
        config.listen_port = port;
    }

    // ------------------------------------------------------
    // 3. Optional Prometheus exporter
    // ------------------------------------------------------
    if config.metrics_port > 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .expect("❌ Failed to install Prometheus recorder");
        info!("📊 Metrics at http://{}/metrics", metrics_addr);
    }

    // ------------------------------------------------------
    // 4. Set global CONFIG (OnceCell) for use across modules
    // ------------------------------------------------------
    CONFIG
        .set(config)
        .expect("❌ CONFIG was already initialized");
    let config = CONFIG.get().expect("CONFIG must be initialized");

    // ------------------------------------------------------
    // 5. Construct the capture-session WARC writer
    // ------------------------------------------------------
    let warc = match WarcWriter::init(
        Path::new(&config.archive.outdir),
        config.archive.max_file_mb * 1024 * 1024,
    ) {
        Ok(writer) => Arc::new(writer),
        Err(e) => {
            error!("❌ Failed to initialize WARC writer: {e}");
            exit(1);
        }
    };

    // ------------------------------------------------------
    // 6. Construct the memcached connection pool
    // ------------------------------------------------------
    let cache = match CacheClient::new(&config.cache) {
        Ok(client) => client,
        Err(e) => {
            error!("❌ Failed to initialize cache client: {e}");
            exit(1);
        }
    };

    let ctx = Arc::new(ProxyContext {
        cache,
        warc: warc.clone(),
    });

    // ------------------------------------------------------
    // 7. Serve proxy traffic on a single hyper service.
    //    Dispatch is by method (GET/POST/CONNECT), not by path:
    //    forward-proxy targets are absolute-form or authority-form.
    // ------------------------------------------------------
    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let make_svc = make_service_fn(move |_conn| {
        let ctx = ctx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| proxy::handle(ctx.clone(), req)))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!("❌ Failed to bind {}: {}", addr, e);
            exit(1);
        }
    };

    info!("🚀 Proxy listening at http://{}", addr);

    // ------------------------------------------------------
    // 8. Run until ctrl-c, then release open WARC files
    // ------------------------------------------------------
    let graceful = server.with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("👋 Shutdown signal received");
    });

    if let Err(e) = graceful.await {
        error!("❌ Proxy server exited with error: {}", e);
        exit(1);
    }

    warc.close().await;
}
