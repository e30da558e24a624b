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
pub mod tests {
    use std::fs::write;
    use warcbolt::config::Config;

    fn temp_config_path(filename: &str) -> String {
        let dir = std::env::temp_dir();
        dir.join(filename).to_string_lossy().to_string()
    }

    #[test]
    fn test_load_valid_config_from_file() {
        let yaml = r#"
listen_port: 9999
cache:
  addr: 10.0.0.1:11211
  max_connections: 100
  op_timeout_ms: 500
upstream:
  connect_timeout_secs: 10
  request_timeout_secs: 60
archive:
  outdir: captures
  max_file_mb: 50
metrics_port: 9464
"#;
        let path = temp_config_path("warcbolt_valid_config.yaml");
        write(&path, yaml).unwrap();
        let config = Config::from_file(&path).expect("should parse valid config");

        assert_eq!(config.listen_port, 9999);
        assert_eq!(config.cache.addr, "10.0.0.1:11211");
        assert_eq!(config.cache.max_connections, 100);
        assert_eq!(config.cache.op_timeout_ms, 500);
        assert_eq!(config.upstream.connect_timeout_secs, 10);
        assert_eq!(config.upstream.request_timeout_secs, 60);
        assert_eq!(config.archive.outdir, "captures");
        assert_eq!(config.archive.max_file_mb, 50);
        assert_eq!(config.metrics_port, 9464);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = "listen_port: 9000\n";
        let path = temp_config_path("warcbolt_partial_config.yaml");
        write(&path, yaml).unwrap();
        let config = Config::from_file(&path).expect("should parse partial config");

        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.cache.addr, "127.0.0.1:11211");
        assert_eq!(config.cache.max_connections, 5000);
        assert_eq!(config.upstream.connect_timeout_secs, 50);
        assert_eq!(config.upstream.request_timeout_secs, 900);
        assert_eq!(config.archive.outdir, "result");
        assert_eq!(config.archive.max_file_mb, 100);
        assert_eq!(config.metrics_port, 0);
    }

    #[test]
    fn test_default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_port, 8888);
        assert_eq!(config.cache.addr, "127.0.0.1:11211");
        assert_eq!(config.cache.max_connections, 5000);
        assert_eq!(config.archive.max_file_mb, 100);
    }

    #[test]
    fn test_empty_cache_addr_fails() {
        let yaml = "cache:\n  addr: \"\"\n";
        let path = temp_config_path("warcbolt_empty_addr.yaml");
        write(&path, yaml).unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_zero_max_connections_fails() {
        let yaml = "cache:\n  max_connections: 0\n";
        let path = temp_config_path("warcbolt_zero_conns.yaml");
        write(&path, yaml).unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_zero_max_file_mb_fails() {
        let yaml = "archive:\n  max_file_mb: 0\n";
        let path = temp_config_path("warcbolt_zero_cap.yaml");
        write(&path, yaml).unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_config_from_file_error_handling() {
        let result = Config::from_file("nonexistent_config.yaml");
        assert!(result.is_err(), "Should error if config file is missing");
    }

    #[test]
    fn test_malformed_yaml_fails() {
        let path = temp_config_path("warcbolt_malformed.yaml");
        write(&path, "listen_port: [not a port").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
