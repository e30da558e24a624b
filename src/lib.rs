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
//  Module declarations
// ----------------------
// Internal modules for the proxy pipeline: request fingerprinting, the
// response codec, the memcached cache client, the WARC archive writer,
// the upstream fetcher, and the per-request handlers.
pub mod cache;
pub mod codec;
pub mod config;
pub mod fingerprint;
pub mod proxy;
pub mod tunnel;
pub mod upstream;
pub mod warc;
