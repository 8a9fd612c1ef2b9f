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

//! Admission and LRU eviction. Only `Uploaded` blocks are ever evicted
//! (I4); eviction is best-effort, so partial progress is a success.

use std::sync::atomic::Ordering;

use crate::atomic_util::atomic_sub_u64;
use crate::block::BlockState;
use crate::cache::Cache;
use crate::cancellation::{self, CancellationToken};
use crate::constants::BLOCK_SIZE;
use crate::error::Result;
use crate::file_entry::FileEntry;

/// Automatic eviction triggered by an admission check in the write path:
/// make room for `new_memory` additional bytes, or do as much as possible.
pub(crate) fn admission_evict(
    cache: &Cache,
    new_memory: u64,
    token: &CancellationToken,
) -> Result<u64> {
    if cache.max_size() == 0 {
        return Ok(0);
    }
    let target = cache.max_size().saturating_sub(new_memory);
    evict_until(cache, target, token)
}

/// `Cache::evict_lru`: evict until `total_size <= max(total_size -
/// target_free, 0)`.
pub(crate) fn evict_lru(cache: &Cache, target_free: u64, token: &CancellationToken) -> Result<u64> {
    cache.check_open()?;
    let current = cache.total_size_atomic().load(Ordering::SeqCst);
    let target = current.saturating_sub(target_free);
    evict_until(cache, target, token)
}

/// `Cache::evict`: drop `Uploaded` blocks of one file.
pub(crate) fn evict_one(cache: &Cache, payload_id: &str, token: &CancellationToken) -> Result<u64> {
    cache.check_open()?;
    cancellation::check(token)?;
    let Some(file) = cache.lookup_file(payload_id) else {
        return Ok(0);
    };
    let freed = evict_file_uploaded_blocks(cache, &file, 0);
    if freed > 0 {
        cache.drop_empty_file(payload_id);
        cache.counters().record_eviction(freed / BLOCK_SIZE as u64);
    }
    Ok(freed)
}

/// `Cache::evict_all`: drop `Uploaded` blocks everywhere.
pub(crate) fn evict_all(cache: &Cache, token: &CancellationToken) -> Result<u64> {
    cache.check_open()?;
    let mut freed = 0u64;
    for (payload_id, file) in cache.snapshot_files() {
        cancellation::check(token)?;
        let freed_here = evict_file_uploaded_blocks(cache, &file, 0);
        freed += freed_here;
        if freed_here > 0 {
            cache.drop_empty_file(&payload_id);
        }
    }
    if freed > 0 {
        cache.counters().record_eviction(freed / BLOCK_SIZE as u64);
    }
    Ok(freed)
}

/// Shared LRU scan: snapshot files with their `last_access` timestamps
/// under the global read lock, sort oldest first (ties broken by
/// `payload_id` for determinism), then for each file, under that file's
/// write lock, drop every `Uploaded` block until `total_size <= target`.
fn evict_until(cache: &Cache, target: u64, token: &CancellationToken) -> Result<u64> {
    if cache.total_size_atomic().load(Ordering::SeqCst) <= target {
        return Ok(0);
    }

    let mut files = cache.snapshot_files();
    files.sort_by(|a, b| a.1.last_access().cmp(&b.1.last_access()).then(a.0.cmp(&b.0)));

    let mut freed = 0u64;
    for (payload_id, file) in files {
        cancellation::check(token)?;
        if cache.total_size_atomic().load(Ordering::SeqCst) <= target {
            break;
        }
        let freed_here = evict_file_uploaded_blocks(cache, &file, target);
        freed += freed_here;
        if freed_here > 0 {
            cache.drop_empty_file(&payload_id);
        }
    }
    if freed > 0 {
        cache.counters().record_eviction(freed / BLOCK_SIZE as u64);
    }
    Ok(freed)
}

/// Drop `Uploaded` blocks (attached or detached) from one file until
/// `total_size <= target`, or until the file is exhausted. A detached
/// `Uploaded` buffer (`data = none`) was already released from `total_size`
/// by `mark_block_uploaded` — its map entry is dropped here for bookkeeping,
/// but `total_size` itself is only decremented for blocks still attached,
/// matching `BlockBuffer::total_size_charged`; decrementing it again here
/// would double-release the charge and underflow the counter.
fn evict_file_uploaded_blocks(cache: &Cache, file: &FileEntry, target: u64) -> u64 {
    let mut guard = file.entry_lock.write();
    let mut freed = 0u64;
    let chunk_indices: Vec<u32> = guard.chunks.keys().copied().collect();
    'outer: for chunk_index in chunk_indices {
        let Some(chunk) = guard.chunks.get_mut(&chunk_index) else {
            continue;
        };
        let block_indices: Vec<u32> = chunk.keys().copied().collect();
        for block_index in block_indices {
            if cache.total_size_atomic().load(Ordering::SeqCst) <= target {
                break 'outer;
            }
            let Some(block) = chunk.get(&block_index) else {
                continue;
            };
            if block.state() != BlockState::Uploaded {
                continue;
            }
            if block.total_size_charged() {
                atomic_sub_u64(cache.total_size_atomic(), BLOCK_SIZE as u64);
                freed += BLOCK_SIZE as u64;
            }
            chunk.remove(&block_index);
        }
        if chunk.is_empty() {
            guard.chunks.remove(&chunk_index);
        }
    }
    freed
}
