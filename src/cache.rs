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

//! The cache engine: write, read, coverage query, dirty-block enumeration,
//! state transitions, truncate, remove, eviction, stats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{RwLock, RwLockReadGuard};

use crate::atomic_util::atomic_sub_u64;
use crate::block::{BlockBuffer, BlockState, UploadCancel};
use crate::cancellation::{self, CancellationToken};
use crate::config::{CacheBuilder, CacheConfig, WalConfig};
use crate::constants::{BLOCK_SIZE, CHUNK_SIZE};
use crate::error::{self, Result};
use crate::eviction;
use crate::file_entry::{ChunkEntry, FileChunks, FileEntry};
use crate::metrics::{Counters, Stats};
use crate::wal::{WalPersister, WalRecord};

/// Lightweight, owned metadata for one dirty block, as returned by
/// [`Cache::get_dirty_blocks`]. Fetch the bytes separately via
/// [`Cache::with_block_data`] to avoid holding a lock across the whole
/// enumeration.
#[derive(Debug, Clone)]
pub struct DirtyBlockMeta {
    pub chunk_index: u32,
    pub block_index: u32,
    pub data_size: usize,
    pub hash: Option<[u8; 32]>,
    pub state: BlockState,
}

/// The block-buffer write-back cache engine.
pub struct Cache {
    files: RwLock<HashMap<String, Arc<FileEntry>>>,
    config: CacheConfig,
    total_size: AtomicU64,
    pending_size: AtomicU64,
    closed: AtomicBool,
    persister: Option<WalPersister>,
    counters: Counters,
}

impl CacheBuilder {
    /// Consume the builder, opening (and replaying) a WAL persister if one
    /// was configured via [`CacheBuilder::wal`].
    pub fn build(self) -> Result<Cache> {
        let (config, wal) = self.into_parts();
        match wal {
            Some(wal_config) => Cache::new_with_wal(config, wal_config),
            None => Ok(Cache::new(config)),
        }
    }
}

impl Cache {
    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    /// Plain in-memory cache, no WAL.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            config,
            total_size: AtomicU64::new(0),
            pending_size: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            persister: None,
            counters: Counters::default(),
        }
    }

    /// Cache backed by a memory-mapped WAL. Opens (or creates) the log and
    /// replays it into the returned cache's in-memory state (§4.6, I8).
    pub fn new_with_wal(config: CacheConfig, wal_config: WalConfig) -> Result<Self> {
        let persister = WalPersister::open(wal_config)?;
        let cache = Self {
            files: RwLock::new(HashMap::new()),
            config,
            total_size: AtomicU64::new(0),
            pending_size: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            persister: Some(persister),
            counters: Counters::default(),
        };
        cache.replay_wal()?;
        Ok(cache)
    }

    fn replay_wal(&self) -> Result<()> {
        let Some(persister) = &self.persister else {
            return Ok(());
        };
        let records = persister.read_all()?;
        for record in records {
            match record {
                WalRecord::BlockWrite {
                    payload_id,
                    chunk_index,
                    block_index,
                    offset_in_block,
                    data,
                } => {
                    let file = self.get_or_create_file(&payload_id);
                    let mut guard = file.entry_lock.write();
                    let chunk = guard.chunks.entry(chunk_index).or_default();
                    let is_new = !chunk.contains_key(&block_index);
                    let block = chunk
                        .entry(block_index)
                        .or_insert_with(|| BlockBuffer::new(BlockState::Pending));

                    // A `BlockWrite` record can target a block a prior
                    // `BlockUploaded` record (earlier in this same replay)
                    // already turned into a detached `Uploaded` placeholder;
                    // re-derive the charge delta from before/after state
                    // rather than assuming `is_new` covers it, same as the
                    // live write path.
                    let was_total_charged = block.total_size_charged();
                    let was_pending_charged = block.pending_charged();
                    if !block.is_attached() {
                        block.reattach();
                    }
                    block.invalidate_ready_for_upload();
                    if block.state() == BlockState::Uploaded {
                        block.redirty();
                    }
                    block.write_at(offset_in_block as usize, &data);

                    if is_new {
                        self.total_size.fetch_add(BLOCK_SIZE as u64, Ordering::SeqCst);
                        self.pending_size
                            .fetch_add(BLOCK_SIZE as u64, Ordering::SeqCst);
                    } else {
                        if !was_total_charged && block.total_size_charged() {
                            self.total_size.fetch_add(BLOCK_SIZE as u64, Ordering::SeqCst);
                        }
                        if !was_pending_charged && block.pending_charged() {
                            self.pending_size
                                .fetch_add(BLOCK_SIZE as u64, Ordering::SeqCst);
                        }
                    }
                }
                WalRecord::BlockUploaded {
                    payload_id,
                    chunk_index,
                    block_index,
                } => {
                    let file = self.get_or_create_file(&payload_id);
                    let mut guard = file.entry_lock.write();
                    let chunk = guard.chunks.entry(chunk_index).or_default();
                    let is_new = !chunk.contains_key(&block_index);
                    let block = chunk
                        .entry(block_index)
                        .or_insert_with(BlockBuffer::new_uploaded_placeholder);
                    let was_uploaded_already = block.state() == BlockState::Uploaded;
                    if block.mark_uploaded() && !was_uploaded_already && !is_new {
                        atomic_sub_u64(&self.pending_size, BLOCK_SIZE as u64);
                    }
                    if is_new {
                        // placeholder never charged total_size/pending_size
                        block.mark_uploaded();
                    }
                }
                WalRecord::Remove { payload_id } => {
                    self.remove_file_entry(&payload_id);
                }
                WalRecord::Legacy(kind) => {
                    debug!("skipping legacy WAL record type {kind} at replay");
                }
            }
        }
        Ok(())
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return error::CacheClosed.fail();
        }
        Ok(())
    }

    fn get_or_create_file(&self, payload_id: &str) -> Arc<FileEntry> {
        if let Some(entry) = self.files.read().get(payload_id) {
            return entry.clone();
        }
        let mut files = self.files.write();
        files
            .entry(payload_id.to_string())
            .or_insert_with(|| Arc::new(FileEntry::new()))
            .clone()
    }

    pub(crate) fn lookup_file(&self, payload_id: &str) -> Option<Arc<FileEntry>> {
        self.files.read().get(payload_id).cloned()
    }

    fn remove_file_entry(&self, payload_id: &str) -> u64 {
        let Some(entry) = self.files.write().remove(payload_id) else {
            return 0;
        };
        let guard = entry.entry_lock.read();
        let mut freed = 0u64;
        for chunk in guard.chunks.values() {
            for block in chunk.values() {
                self.release_block(block);
                freed += BLOCK_SIZE as u64;
            }
        }
        freed
    }

    // -- write ---------------------------------------------------------

    pub fn write(
        &self,
        payload_id: &str,
        chunk_index: u32,
        data: &[u8],
        offset: u64,
        token: &CancellationToken,
    ) -> Result<()> {
        self.write_impl(payload_id, chunk_index, data, offset, false, token)
    }

    pub fn write_downloaded(
        &self,
        payload_id: &str,
        chunk_index: u32,
        data: &[u8],
        offset: u64,
        token: &CancellationToken,
    ) -> Result<()> {
        self.write_impl(payload_id, chunk_index, data, offset, true, token)
    }

    fn write_impl(
        &self,
        payload_id: &str,
        chunk_index: u32,
        data: &[u8],
        offset: u64,
        downloaded: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        self.check_open()?;
        cancellation::check(token)?;

        if data.is_empty() {
            return Ok(());
        }
        let len = data.len() as u64;
        if offset.checked_add(len).map(|end| end > CHUNK_SIZE).unwrap_or(true) {
            return error::InvalidOffset {
                offset,
                len: data.len(),
                chunk_size: CHUNK_SIZE,
            }
            .fail();
        }

        let start_block = (offset / BLOCK_SIZE as u64) as u32;
        let end_block = ((offset + len - 1) / BLOCK_SIZE as u64) as u32;

        let file = self.get_or_create_file(payload_id);

        let mut pending_records: Vec<WalRecord> = Vec::new();
        {
            let mut guard = file.entry_lock.write();

            let mut new_memory =
                self.count_new_memory(&guard, chunk_index, start_block, end_block);

            if !downloaded {
                if self.config.max_size > 0
                    && self.total_size.load(Ordering::SeqCst) + new_memory > self.config.max_size
                {
                    drop(guard);
                    eviction::admission_evict(self, new_memory, token)?;
                    guard = file.entry_lock.write();
                    new_memory =
                        self.count_new_memory(&guard, chunk_index, start_block, end_block);
                    if self.total_size.load(Ordering::SeqCst) + new_memory > self.config.max_size {
                        return error::CacheFull.fail();
                    }
                }
                let effective_pending_limit = self.config.max_pending_size;
                if effective_pending_limit > 0
                    && self.pending_size.load(Ordering::SeqCst) + new_memory
                        > effective_pending_limit
                {
                    return error::CacheFull.fail();
                }
            }

            // Pre-check pass: refuse the whole write if any spanned block is
            // currently claimed by an in-flight upload, before mutating any
            // of them.
            if !downloaded {
                let chunk = guard.chunks.get(&chunk_index);
                if let Some(chunk) = chunk {
                    for b in start_block..=end_block {
                        if let Some(block) = chunk.get(&b) {
                            if block.state() == BlockState::Uploading {
                                return error::CacheFull.fail();
                            }
                        }
                    }
                }
            }

            file.touch();

            let chunk = guard.chunks.entry(chunk_index).or_default();
            for b in start_block..=end_block {
                let existed = chunk.contains_key(&b);
                let block = chunk
                    .entry(b)
                    .or_insert_with(|| BlockBuffer::new(if downloaded {
                        BlockState::Uploaded
                    } else {
                        BlockState::Pending
                    }));

                if !existed {
                    self.total_size.fetch_add(BLOCK_SIZE as u64, Ordering::SeqCst);
                    if !downloaded {
                        self.pending_size
                            .fetch_add(BLOCK_SIZE as u64, Ordering::SeqCst);
                    }
                } else {
                    // Re-derive the charge delta from the block's own
                    // before/after accounting state rather than assuming
                    // attachment alone: a block reaching here detached can
                    // only be `Uploaded` (an in-flight `Uploading` block
                    // fails the pre-check above), meaning its charge was
                    // already released by `mark_block_uploaded` and must be
                    // re-credited now that the write reattaches it.
                    let was_total_charged = block.total_size_charged();
                    let was_pending_charged = block.pending_charged();

                    if !block.is_attached() {
                        block.reattach();
                    }
                    if !downloaded {
                        block.invalidate_ready_for_upload();
                        if block.state() == BlockState::Uploaded {
                            block.redirty();
                        }
                    }

                    if !was_total_charged && block.total_size_charged() {
                        self.total_size.fetch_add(BLOCK_SIZE as u64, Ordering::SeqCst);
                    }
                    if !downloaded && !was_pending_charged && block.pending_charged() {
                        self.pending_size
                            .fetch_add(BLOCK_SIZE as u64, Ordering::SeqCst);
                    }
                }

                let block_start_abs = b as u64 * BLOCK_SIZE as u64;
                let overlap_start_abs = offset.max(block_start_abs);
                let overlap_end_abs = (offset + len).min(block_start_abs + BLOCK_SIZE as u64);
                let in_block_start = (overlap_start_abs - block_start_abs) as usize;
                let src_start = (overlap_start_abs - offset) as usize;
                let src_end = (overlap_end_abs - offset) as usize;
                let src = &data[src_start..src_end];

                block.write_at(in_block_start, src);

                if !downloaded && self.persister.is_some() {
                    pending_records.push(WalRecord::BlockWrite {
                        payload_id: payload_id.to_string(),
                        chunk_index,
                        block_index: b,
                        offset_in_block: in_block_start as u32,
                        data: src.to_vec(),
                    });
                }
            }
        } // file lock released here; WAL append happens outside it

        if let Some(persister) = &self.persister {
            for record in pending_records {
                if let Err(e) = persister.append(&record) {
                    self.counters.record_wal_append_error();
                    warn!("WAL append failed during write: {e}");
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    fn count_new_memory(
        &self,
        guard: &parking_lot::RwLockWriteGuard<'_, FileChunks>,
        chunk_index: u32,
        start_block: u32,
        end_block: u32,
    ) -> u64 {
        let mut count = 0u64;
        let chunk = guard.chunks.get(&chunk_index);
        for b in start_block..=end_block {
            let absent_or_detached = match chunk.and_then(|c| c.get(&b)) {
                None => true,
                Some(block) => !block.is_attached(),
            };
            if absent_or_detached {
                count += BLOCK_SIZE as u64;
            }
        }
        count
    }

    // -- read ------------------------------------------------------------

    /// Returns `(found, covered)`. Copies bytes from cache-owned blocks into
    /// `dest`; bytes not covered by any block are left untouched (sparse
    /// file semantics are the caller's responsibility).
    pub fn read(
        &self,
        payload_id: &str,
        chunk_index: u32,
        offset: u64,
        dest: &mut [u8],
        token: &CancellationToken,
    ) -> Result<(bool, bool)> {
        self.check_open()?;
        cancellation::check(token)?;

        if dest.is_empty() {
            return Ok((self.lookup_file(payload_id).is_some(), true));
        }

        let Some(file) = self.lookup_file(payload_id) else {
            return Ok((false, false));
        };

        let len = dest.len() as u64;
        let start_block = (offset / BLOCK_SIZE as u64) as u32;
        let end_block = ((offset + len - 1) / BLOCK_SIZE as u64) as u32;

        let guard = file.entry_lock.read();
        let mut covered = true;
        let chunk = guard.chunks.get(&chunk_index);
        for b in start_block..=end_block {
            let block_start_abs = b as u64 * BLOCK_SIZE as u64;
            let overlap_start_abs = offset.max(block_start_abs);
            let overlap_end_abs = (offset + len).min(block_start_abs + BLOCK_SIZE as u64);
            let in_block_start = (overlap_start_abs - block_start_abs) as usize;
            let in_block_end = (overlap_end_abs - block_start_abs) as usize;
            let dest_start = (overlap_start_abs - offset) as usize;
            let dest_end = (overlap_end_abs - offset) as usize;

            match chunk.and_then(|c| c.get(&b)) {
                Some(block) if block.is_attached() => {
                    if !block.coverage().is_covered(in_block_start, in_block_end) {
                        covered = false;
                    }
                    block.read_at(in_block_start, &mut dest[dest_start..dest_end]);
                }
                _ => {
                    covered = false;
                }
            }
        }
        Ok((true, covered))
    }

    pub fn is_range_covered(
        &self,
        payload_id: &str,
        chunk_index: u32,
        offset: u64,
        length: u64,
        token: &CancellationToken,
    ) -> Result<bool> {
        self.check_open()?;
        cancellation::check(token)?;

        if length == 0 {
            return Ok(true);
        }
        let Some(file) = self.lookup_file(payload_id) else {
            return Ok(false);
        };

        let start_block = (offset / BLOCK_SIZE as u64) as u32;
        let end_block = ((offset + length - 1) / BLOCK_SIZE as u64) as u32;

        let guard = file.entry_lock.read();
        let chunk = guard.chunks.get(&chunk_index);
        for b in start_block..=end_block {
            let block_start_abs = b as u64 * BLOCK_SIZE as u64;
            let overlap_start_abs = offset.max(block_start_abs);
            let overlap_end_abs = (offset + length).min(block_start_abs + BLOCK_SIZE as u64);
            let in_block_start = (overlap_start_abs - block_start_abs) as usize;
            let in_block_end = (overlap_end_abs - block_start_abs) as usize;

            match chunk.and_then(|c| c.get(&b)) {
                Some(block) if block.is_attached() => {
                    if !block.coverage().is_covered(in_block_start, in_block_end) {
                        return Ok(false);
                    }
                }
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    // -- dirty block enumeration -----------------------------------------

    pub fn get_dirty_blocks(
        &self,
        payload_id: &str,
        token: &CancellationToken,
    ) -> Result<Vec<DirtyBlockMeta>> {
        self.check_open()?;
        cancellation::check(token)?;

        let Some(file) = self.lookup_file(payload_id) else {
            return error::FileNotInCache {
                payload_id: payload_id.to_string(),
            }
            .fail();
        };

        let guard = file.entry_lock.read();
        let mut out = Vec::new();
        for (&chunk_index, chunk) in &guard.chunks {
            cancellation::check(token)?;
            for (&block_index, block) in chunk {
                if matches!(block.state(), BlockState::Pending | BlockState::ReadyForUpload) {
                    out.push(DirtyBlockMeta {
                        chunk_index,
                        block_index,
                        data_size: block.data_size(),
                        hash: block.hash().copied(),
                        state: block.state(),
                    });
                }
            }
        }
        Ok(out)
    }

    /// Zero-copy, guard-backed access to one block's bytes and coverage.
    /// Used by an uploader after discovering dirty blocks via
    /// [`Cache::get_dirty_blocks`].
    pub fn with_block_data<R>(
        &self,
        payload_id: &str,
        chunk_index: u32,
        block_index: u32,
        f: impl FnOnce(&[u8], usize) -> R,
    ) -> Result<Option<R>> {
        self.check_open()?;
        let Some(file) = self.lookup_file(payload_id) else {
            return Ok(None);
        };
        let guard = file.entry_lock.read();
        let Some(block) = guard
            .chunks
            .get(&chunk_index)
            .and_then(|c| c.get(&block_index))
        else {
            return Ok(None);
        };
        let Some(data) = block.data() else {
            return Ok(None);
        };
        Ok(Some(f(data, block.data_size())))
    }

    // -- block state transitions -------------------------------------------

    pub fn mark_block_ready_for_upload(
        &self,
        payload_id: &str,
        chunk_index: u32,
        block_index: u32,
        hash: [u8; 32],
        cancel: Option<UploadCancel>,
    ) -> Result<bool> {
        self.with_block_mut(payload_id, chunk_index, block_index, |block| {
            block.mark_ready_for_upload(hash, cancel)
        })
    }

    pub fn mark_block_uploading(
        &self,
        payload_id: &str,
        chunk_index: u32,
        block_index: u32,
    ) -> Result<bool> {
        self.with_block_mut(payload_id, chunk_index, block_index, |block| {
            block.mark_uploading()
        })
    }

    /// Zero-copy claim: moves the block's buffer out of the cache. Returns
    /// `(data, data_size, ok)`.
    pub fn detach_block_for_upload(
        &self,
        payload_id: &str,
        chunk_index: u32,
        block_index: u32,
    ) -> Result<(Option<Box<[u8]>>, usize, bool)> {
        let mut detached = None;
        let mut size = 0;
        let ok = self.with_block_mut(payload_id, chunk_index, block_index, |block| {
            match block.detach_for_upload() {
                Some((data, data_size)) => {
                    detached = Some(data);
                    size = data_size;
                    true
                }
                None => false,
            }
        })?;
        if ok {
            // data was attached and charged to total_size; it now leaves the
            // cache's accounting entirely until restore() or mark_uploaded().
        }
        Ok((detached, size, ok))
    }

    pub fn restore_block_buffer(
        &self,
        payload_id: &str,
        chunk_index: u32,
        block_index: u32,
        data: Box<[u8]>,
    ) -> Result<bool> {
        self.with_block_mut(payload_id, chunk_index, block_index, move |block| {
            block.restore(data)
        })
    }

    pub fn mark_block_uploaded(
        &self,
        payload_id: &str,
        chunk_index: u32,
        block_index: u32,
    ) -> Result<bool> {
        let mut was_detached = false;
        let mut changed = false;
        self.with_block_mut(payload_id, chunk_index, block_index, |block| {
            was_detached = !block.is_attached();
            changed = block.mark_uploaded();
        })?;

        if changed {
            atomic_sub_u64(&self.pending_size, BLOCK_SIZE as u64);
            if was_detached {
                atomic_sub_u64(&self.total_size, BLOCK_SIZE as u64);
            }
            if let Some(persister) = &self.persister {
                let record = WalRecord::BlockUploaded {
                    payload_id: payload_id.to_string(),
                    chunk_index,
                    block_index,
                };
                // WAL append failure here is swallowed: the worst case on
                // crash is a redundant re-upload of already-stored,
                // content-addressed data.
                if let Err(e) = persister.append(&record) {
                    self.counters.record_wal_append_error();
                    warn!("WAL append for BlockUploaded marker failed (ignored): {e}");
                }
            }
        }
        Ok(changed)
    }

    pub fn mark_block_pending(
        &self,
        payload_id: &str,
        chunk_index: u32,
        block_index: u32,
    ) -> Result<bool> {
        self.with_block_mut(payload_id, chunk_index, block_index, |block| {
            block.mark_pending()
        })
    }

    fn with_block_mut<R>(
        &self,
        payload_id: &str,
        chunk_index: u32,
        block_index: u32,
        f: impl FnOnce(&mut BlockBuffer) -> R,
    ) -> Result<R>
    where
        R: Default,
    {
        self.check_open()?;
        let Some(file) = self.lookup_file(payload_id) else {
            return Ok(R::default());
        };
        let mut guard = file.entry_lock.write();
        let Some(block) = guard
            .chunks
            .get_mut(&chunk_index)
            .and_then(|c| c.get_mut(&block_index))
        else {
            return Ok(R::default());
        };
        Ok(f(block))
    }

    // -- truncate / remove -------------------------------------------------

    pub fn truncate(
        &self,
        payload_id: &str,
        new_size: u64,
        token: &CancellationToken,
    ) -> Result<()> {
        self.check_open()?;
        cancellation::check(token)?;

        let Some(file) = self.lookup_file(payload_id) else {
            return Ok(());
        };

        let keep_chunk = (new_size / CHUNK_SIZE) as u32;
        let offset_in_chunk = new_size % CHUNK_SIZE;
        let keep_block = (offset_in_chunk / BLOCK_SIZE as u64) as u32;
        let offset_in_block = (offset_in_chunk % BLOCK_SIZE as u64) as usize;

        let mut guard = file.entry_lock.write();
        let chunk_indices: Vec<u32> = guard.chunks.keys().copied().collect();
        for chunk_index in chunk_indices {
            cancellation::check(token)?;
            match chunk_index.cmp(&keep_chunk) {
                std::cmp::Ordering::Greater => {
                    if let Some(chunk) = guard.chunks.remove(&chunk_index) {
                        self.release_chunk(&chunk);
                    }
                }
                std::cmp::Ordering::Equal => {
                    let Some(chunk) = guard.chunks.get_mut(&chunk_index) else {
                        continue;
                    };
                    let block_indices: Vec<u32> = chunk.keys().copied().collect();
                    for block_index in block_indices {
                        match block_index.cmp(&keep_block) {
                            std::cmp::Ordering::Greater => {
                                if let Some(block) = chunk.remove(&block_index) {
                                    self.release_block(&block);
                                }
                            }
                            std::cmp::Ordering::Equal => {
                                if let Some(block) = chunk.get_mut(&block_index) {
                                    block.clear_tail_from(offset_in_block);
                                }
                            }
                            std::cmp::Ordering::Less => {}
                        }
                    }
                }
                std::cmp::Ordering::Less => {}
            }
        }
        Ok(())
    }

    pub fn remove(&self, payload_id: &str, token: &CancellationToken) -> Result<()> {
        self.check_open()?;
        cancellation::check(token)?;

        self.remove_file_entry(payload_id);

        if let Some(persister) = &self.persister {
            let record = WalRecord::Remove {
                payload_id: payload_id.to_string(),
            };
            persister.append(&record)?;
        }
        Ok(())
    }

    fn release_chunk(&self, chunk: &ChunkEntry) {
        for block in chunk.values() {
            self.release_block(block);
        }
    }

    /// Release whatever charge `block` currently holds against `total_size`
    /// / `pending_size`. A detached `Uploading` block (mid zero-copy upload,
    /// not yet claimed by `mark_block_uploaded`) is still charged against
    /// both counters even though `data = none` — attachment alone does not
    /// tell us whether the charge was already released, only the block's
    /// state does (see `BlockBuffer::total_size_charged` /
    /// `pending_charged`).
    fn release_block(&self, block: &BlockBuffer) {
        if block.total_size_charged() {
            atomic_sub_u64(&self.total_size, BLOCK_SIZE as u64);
        }
        if block.pending_charged() {
            atomic_sub_u64(&self.pending_size, BLOCK_SIZE as u64);
        }
    }

    // -- accessors -----------------------------------------------------

    pub fn has_dirty_data(&self, payload_id: &str) -> bool {
        let Some(file) = self.lookup_file(payload_id) else {
            return false;
        };
        let guard = file.entry_lock.read();
        guard.chunks.values().any(|chunk| {
            chunk
                .values()
                .any(|b| matches!(b.state(), BlockState::Pending | BlockState::ReadyForUpload))
        })
    }

    pub fn get_file_size(&self, payload_id: &str) -> Option<u64> {
        let file = self.lookup_file(payload_id)?;
        let guard = file.entry_lock.read();
        let mut size = 0u64;
        for (&chunk_index, chunk) in &guard.chunks {
            if let Some((&max_block, _)) = chunk.iter().next_back() {
                let base = chunk_index as u64 * CHUNK_SIZE + max_block as u64 * BLOCK_SIZE as u64;
                if let Some(block) = chunk.get(&max_block) {
                    size = size.max(base + block.data_size() as u64);
                }
            }
        }
        Some(size)
    }

    pub fn list_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.files.read().keys().cloned().collect();
        files.sort();
        files
    }

    pub fn list_files_with_sizes(&self) -> Vec<(String, u64)> {
        self.list_files()
            .into_iter()
            .filter_map(|name| {
                let size = self.get_file_size(&name)?;
                Some((name, size))
            })
            .collect()
    }

    pub fn stats(&self) -> Stats {
        let files = self.files.read();
        let mut dirty_bytes = 0u64;
        let mut uploaded_bytes = 0u64;
        let mut block_count = 0usize;
        for entry in files.values() {
            let guard = entry.entry_lock.read();
            for chunk in guard.chunks.values() {
                for block in chunk.values() {
                    block_count += 1;
                    match block.state() {
                        BlockState::Uploaded => uploaded_bytes += block.data_size() as u64,
                        _ => dirty_bytes += block.data_size() as u64,
                    }
                }
            }
        }
        Stats {
            total_size: self.total_size.load(Ordering::SeqCst),
            max_size: self.config.max_size,
            file_count: files.len(),
            dirty_bytes,
            uploaded_bytes,
            block_count,
            evicted_blocks_total: self.counters.evicted_blocks_total(),
            wal_append_errors_total: self.counters.wal_append_errors_total(),
        }
    }

    /// Evict `Uploaded` blocks of one file. Returns bytes freed.
    pub fn evict(&self, payload_id: &str, token: &CancellationToken) -> Result<u64> {
        eviction::evict_one(self, payload_id, token)
    }

    /// Evict `Uploaded` blocks across every file. Returns bytes freed.
    pub fn evict_all(&self, token: &CancellationToken) -> Result<u64> {
        eviction::evict_all(self, token)
    }

    /// Evict `Uploaded` blocks, oldest files first, until `total_size <=
    /// max(total_size - target_free, 0)`. Returns bytes freed.
    pub fn evict_lru(&self, target_free: u64, token: &CancellationToken) -> Result<u64> {
        eviction::evict_lru(self, target_free, token)
    }

    pub fn sync(&self) -> Result<()> {
        if let Some(persister) = &self.persister {
            persister.sync()?;
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(persister) = &self.persister {
            persister.close()?;
        }
        Ok(())
    }

    // -- internal access for the eviction module --------------------------

    pub(crate) fn total_size_atomic(&self) -> &AtomicU64 {
        &self.total_size
    }

    pub(crate) fn max_size(&self) -> u64 {
        self.config.max_size
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub(crate) fn snapshot_files(&self) -> Vec<(String, Arc<FileEntry>)> {
        self.files
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn drop_empty_file(&self, payload_id: &str) {
        let mut files = self.files.write();
        if let Some(entry) = files.get(payload_id) {
            if entry.entry_lock.read().is_empty() {
                files.remove(payload_id);
            }
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.close();
        }
    }
}

/// Borrowed read guard used internally by the eviction scan.
pub(crate) type FileReadGuard<'a> = RwLockReadGuard<'a, FileChunks>;
