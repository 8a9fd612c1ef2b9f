// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Configuration structs for the cache engine and the WAL persister.

use std::path::PathBuf;

use crate::constants::DEFAULT_MAX_PENDING_SIZE;

/// Size-based limits for the in-memory cache. Zero means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_size: u64,
    pub max_pending_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 0,
            max_pending_size: DEFAULT_MAX_PENDING_SIZE,
        }
    }
}

/// Configuration for the mmap-backed WAL persister.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory the WAL file lives in. Must already exist.
    pub dir: PathBuf,
    /// WAL file name within `dir`.
    pub file_name: String,
    /// Initial mmap size when the file is created fresh.
    pub initial_size: u64,
    /// Whether every `BlockWrite`/`BlockUploaded` append also calls
    /// `Sync()`. Off by default: trades a window of un-flushed writes for
    /// throughput, deferring to periodic rather than per-write fsync.
    pub sync_on_every_write: bool,
}

impl WalConfig {
    pub const DEFAULT_INITIAL_SIZE: u64 = 64 * 1024 * 1024;

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: "cache.dat".to_string(),
            initial_size: Self::DEFAULT_INITIAL_SIZE,
            sync_on_every_write: false,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// Builder for [`crate::cache::Cache`], mirroring the chained-setter shape
/// used throughout this lineage's config structs.
#[derive(Default)]
pub struct CacheBuilder {
    config: CacheConfig,
    wal: Option<WalConfig>,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_size(mut self, max_size: u64) -> Self {
        self.config.max_size = max_size;
        self
    }

    pub fn max_pending_size(mut self, max_pending_size: u64) -> Self {
        self.config.max_pending_size = max_pending_size;
        self
    }

    pub fn wal(mut self, wal: WalConfig) -> Self {
        self.wal = Some(wal);
        self
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub fn into_parts(self) -> (CacheConfig, Option<WalConfig>) {
        (self.config, self.wal)
    }
}
