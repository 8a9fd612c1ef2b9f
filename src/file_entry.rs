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

//! Per-file chunk map: `chunk_index -> (block_index -> block_buffer)`,
//! guarded by a per-file read/write lock, plus an LRU timestamp.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::block::BlockBuffer;

/// `block_index -> block_buffer` within one chunk. `BTreeMap` keeps
/// `get_dirty_blocks` naturally sorted without an extra pass.
pub type ChunkEntry = BTreeMap<u32, BlockBuffer>;

/// The mutable part of a file entry, guarded by `entry_lock`.
#[derive(Default)]
pub struct FileChunks {
    pub chunks: BTreeMap<u32, ChunkEntry>,
}

impl FileChunks {
    pub fn is_empty(&self) -> bool {
        self.chunks.values().all(|c| c.is_empty())
    }
}

/// One file's worth of cached state: chunk map plus bookkeeping never
/// touched for correctness, only for LRU ordering.
pub struct FileEntry {
    pub entry_lock: RwLock<FileChunks>,
    last_access: AtomicU64,
}

impl FileEntry {
    pub fn new() -> Self {
        Self {
            entry_lock: RwLock::new(FileChunks::default()),
            last_access: AtomicU64::new(now_millis()),
        }
    }

    pub fn touch(&self) {
        self.last_access.store(now_millis(), Ordering::Relaxed);
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

impl Default for FileEntry {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_empty() {
        let entry = FileEntry::new();
        assert!(entry.entry_lock.read().is_empty());
    }

    #[test]
    fn touch_advances_last_access() {
        let entry = FileEntry::new();
        let first = entry.last_access();
        std::thread::sleep(std::time::Duration::from_millis(2));
        entry.touch();
        assert!(entry.last_access() >= first);
    }
}
