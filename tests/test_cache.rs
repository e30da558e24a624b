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

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;
    use warcbolt::cache::client::CacheClient;
    use warcbolt::config::CacheSettings;

    /// Minimal in-memory memcached speaking just enough of the text
    /// protocol for the client under test: get, set, version.
    async fn spawn_fake_memcached() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let store = store.clone();
                tokio::spawn(async move {
                    let mut stream = BufStream::new(socket);
                    loop {
                        let mut line = String::new();
                        match stream.read_line(&mut line).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                        let line = line.trim_end().to_string();
                        let parts: Vec<&str> = line.split_whitespace().collect();
                        match parts.as_slice() {
                            ["get", key] => {
                                let store = store.lock().await;
                                if let Some(value) = store.get(*key) {
                                    let header =
                                        format!("VALUE {} 0 {}\r\n", key, value.len());
                                    let _ = stream.write_all(header.as_bytes()).await;
                                    let _ = stream.write_all(value).await;
                                    let _ = stream.write_all(b"\r\nEND\r\n").await;
                                } else {
                                    let _ = stream.write_all(b"END\r\n").await;
                                }
                                let _ = stream.flush().await;
                            }
                            ["set", key, _flags, _exp, len] => {
                                let len: usize = len.parse().unwrap_or(0);
                                let mut data = vec![0u8; len + 2];
                                if stream.read_exact(&mut data).await.is_err() {
                                    break;
                                }
                                data.truncate(len);
                                store.lock().await.insert(key.to_string(), data);
                                let _ = stream.write_all(b"STORED\r\n").await;
                                let _ = stream.flush().await;
                            }
                            ["version"] => {
                                let _ = stream.write_all(b"VERSION 1.6.0-test\r\n").await;
                                let _ = stream.flush().await;
                            }
                            _ => {
                                let _ = stream.write_all(b"ERROR\r\n").await;
                                let _ = stream.flush().await;
                            }
                        }
                    }
                });
            }
        });

        addr
    }

    fn settings(addr: &SocketAddr) -> CacheSettings {
        CacheSettings {
            addr: addr.to_string(),
            max_connections: 4,
            op_timeout_ms: 2000,
        }
    }

    #[tokio::test]
    async fn test_get_missing_key_returns_none() {
        let addr = spawn_fake_memcached().await;
        let client = CacheClient::new(&settings(&addr)).unwrap();

        assert!(client.get("no-such-key").await.is_none());
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips_binary_values() {
        let addr = spawn_fake_memcached().await;
        let client = CacheClient::new(&settings(&addr)).unwrap();

        // Value contains CRLF and NULs; the length-prefixed framing must
        // carry it untouched.
        let value = b"line1\r\nline2\x00\xff".to_vec();
        client.set("blob-key", &value).await;

        let fetched = client.get("blob-key").await.expect("value should be stored");
        assert_eq!(&fetched[..], &value[..]);
    }

    #[tokio::test]
    async fn test_set_overwrites_existing_value() {
        let addr = spawn_fake_memcached().await;
        let client = CacheClient::new(&settings(&addr)).unwrap();

        client.set("key", b"old").await;
        client.set("key", b"new").await;

        let fetched = client.get("key").await.expect("value should be stored");
        assert_eq!(&fetched[..], b"new");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_miss() {
        let client = CacheClient::new(&CacheSettings {
            addr: "127.0.0.1:9".to_string(),
            max_connections: 1,
            op_timeout_ms: 500,
        })
        .unwrap();

        assert!(client.get("any-key").await.is_none());
    }

    #[tokio::test]
    async fn test_set_against_unreachable_server_is_swallowed() {
        let client = CacheClient::new(&CacheSettings {
            addr: "127.0.0.1:9".to_string(),
            max_connections: 1,
            op_timeout_ms: 500,
        })
        .unwrap();

        // Must not panic or hang past the deadline
        client.set("any-key", b"value").await;
    }

    #[tokio::test]
    async fn test_sequential_operations_reuse_the_pool() {
        let addr = spawn_fake_memcached().await;
        let client = CacheClient::new(&settings(&addr)).unwrap();

        for i in 0..10 {
            let key = format!("key-{i}");
            client.set(&key, key.as_bytes()).await;
            let fetched = client.get(&key).await.expect("value should be stored");
            assert_eq!(fetched, key.as_bytes());
        }
    }
}
