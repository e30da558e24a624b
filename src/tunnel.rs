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
use tokio::io::copy_bidirectional;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Handles a `CONNECT host:port` request by opening a TCP connection to
/// the target and relaying raw bytes both ways until either side closes.
/// Tunneled traffic is never inspected, cached, or archived.
pub async fn handle_connect(req: Request<Body>) -> Response<Body> {
    let authority = match target_authority(&req) {
        Some(authority) => authority,
        None => {
            warn!("⚠️ CONNECT without a host:port target: '{}'", req.uri());
            return plain_response(StatusCode::BAD_REQUEST, "CONNECT requires host:port");
        }
    };

    let mut upstream = match TcpStream::connect(&authority).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("⛔ CONNECT to '{}' failed: {}", authority, e);
            return plain_response(StatusCode::BAD_GATEWAY, &format!("Bad gateway: {e}"));
        }
    };

    counter!("tunnels_opened_total").increment(1);

    // Answer 200 now; the relay starts once hyper hands over the raw
    // client connection.
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(mut client) => {
                match copy_bidirectional(&mut client, &mut upstream).await {
                    Ok((sent, received)) => debug!(
                        "🔌 Tunnel to '{}' closed ({} bytes out, {} bytes in)",
                        authority, sent, received
                    ),
                    Err(e) => debug!("🔌 Tunnel to '{}' ended: {}", authority, e),
                }
            }
            Err(e) => warn!("⚠️ CONNECT upgrade failed for '{}': {}", authority, e),
        }
    });

    Response::new(Body::empty())
}

/// The authority-form request target, with `:443` appended when the client
/// left the port off.
fn target_authority(req: &Request<Body>) -> Option<String> {
    let authority = req.uri().authority()?.to_string();
    if authority.contains(':') {
        Some(authority)
    } else {
        Some(format!("{authority}:443"))
    }
}

fn plain_response(status: StatusCode, body: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
}
