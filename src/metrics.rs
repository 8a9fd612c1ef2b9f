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

//! Point-in-time stats snapshot and the running counters behind it.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot returned by `Cache::stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub total_size: u64,
    pub max_size: u64,
    pub file_count: usize,
    pub dirty_bytes: u64,
    pub uploaded_bytes: u64,
    pub block_count: usize,
    /// Monotonic counter of blocks evicted over the cache's lifetime.
    pub evicted_blocks_total: u64,
    /// Monotonic counter of WAL append failures over the cache's lifetime.
    pub wal_append_errors_total: u64,
}

/// Running counters not reset by reading `Stats`.
#[derive(Default)]
pub(crate) struct Counters {
    evicted_blocks_total: AtomicU64,
    wal_append_errors_total: AtomicU64,
}

impl Counters {
    pub fn record_eviction(&self, blocks: u64) {
        self.evicted_blocks_total.fetch_add(blocks, Ordering::Relaxed);
    }

    pub fn record_wal_append_error(&self) {
        self.wal_append_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evicted_blocks_total(&self) -> u64 {
        self.evicted_blocks_total.load(Ordering::Relaxed)
    }

    pub fn wal_append_errors_total(&self) -> u64 {
        self.wal_append_errors_total.load(Ordering::Relaxed)
    }
}
