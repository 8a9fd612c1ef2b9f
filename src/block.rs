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

//! Fixed-size block buffer plus coverage, state, data-size and the
//! upload-cancel hook.

use crate::constants::BLOCK_SIZE;
use crate::coverage::Coverage;

/// The four states a block buffer moves through on its way to the remote
/// block store. Only [`BlockState::Uploaded`] is evictable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Pending,
    ReadyForUpload,
    Uploading,
    Uploaded,
}

/// One-shot callback fired when a write invalidates a block already handed
/// to the uploader as `ReadyForUpload`. Invoked at most once; cleared
/// whenever the block leaves `ReadyForUpload`.
pub type UploadCancel = Box<dyn FnOnce() + Send + Sync>;

/// A single 4 MiB (by default) block buffer.
pub struct BlockBuffer {
    /// Owned byte buffer, or `None` when detached for zero-copy upload.
    data: Option<Box<[u8]>>,
    coverage: Coverage,
    data_size: usize,
    state: BlockState,
    hash: Option<[u8; 32]>,
    upload_cancel: Option<UploadCancel>,
}

impl BlockBuffer {
    /// Create a freshly-attached block buffer in `Pending` state (the write
    /// path) or `Uploaded` state (the downloaded-write / WAL-replay path).
    pub fn new(state: BlockState) -> Self {
        Self {
            data: Some(vec![0u8; BLOCK_SIZE].into_boxed_slice()),
            coverage: Coverage::new(),
            data_size: 0,
            state,
            hash: None,
            upload_cancel: None,
        }
    }

    /// Create a detached placeholder (used only by the eviction path to
    /// represent an uploaded-but-not-yet-released buffer); never constructed
    /// directly by a write.
    fn new_detached(state: BlockState) -> Self {
        Self {
            data: None,
            coverage: Coverage::new(),
            data_size: 0,
            state,
            hash: None,
            upload_cancel: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.data.is_some()
    }

    /// Whether this buffer's `BLOCK_SIZE` is currently charged against the
    /// cache's `total_size` counter. The only combination that is *not*
    /// charged is `Uploaded` + detached: `mark_block_uploaded` releases the
    /// charge right there (§4.3) because the uploader has taken ownership of
    /// the bytes. Every other combination — attached in any state, or
    /// detached-`Uploading` mid-flight before the upload completes — still
    /// holds its charge.
    pub fn total_size_charged(&self) -> bool {
        self.is_attached() || self.state != BlockState::Uploaded
    }

    /// Whether this buffer's `BLOCK_SIZE` is currently charged against the
    /// cache's `pending_size` counter. Charged for every state other than
    /// `Uploaded`, regardless of attachment: a detached `Uploading` block is
    /// still un-uploaded data and must keep reserving pending capacity until
    /// `mark_block_uploaded` actually fires.
    pub fn pending_charged(&self) -> bool {
        self.state != BlockState::Uploaded
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn hash(&self) -> Option<&[u8; 32]> {
        self.hash.as_ref()
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    /// Read-only view of the attached buffer, if any.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Reallocate `data` (zeroed) and reset `coverage`, preserving `state`.
    /// Called when a write targets a block that exists but was detached.
    pub fn reattach(&mut self) {
        if self.data.is_none() {
            self.data = Some(vec![0u8; BLOCK_SIZE].into_boxed_slice());
            self.coverage.clear();
            self.data_size = 0;
        }
    }

    /// Copy `bytes` into the block at in-block offset `at`, mark coverage,
    /// and extend `data_size`. Panics if out of range; callers compute the
    /// overlap before calling.
    pub fn write_at(&mut self, at: usize, bytes: &[u8]) {
        let data = self.data.as_mut().expect("write_at on detached block");
        data[at..at + bytes.len()].copy_from_slice(bytes);
        self.coverage.mark(at, at + bytes.len());
        self.data_size = self.data_size.max(at + bytes.len());
    }

    /// Copy `[at, at + dest.len())` out of the block into `dest`.
    pub fn read_at(&self, at: usize, dest: &mut [u8]) {
        if let Some(data) = &self.data {
            dest.copy_from_slice(&data[at..at + dest.len()]);
        }
    }

    pub fn clear_tail_from(&mut self, offset: usize) {
        self.data_size = self.data_size.min(offset);
        self.coverage.clear_from(offset);
    }

    // -- state machine -----------------------------------------------------

    /// `Pending` -> `ReadyForUpload`. Idempotent: only takes effect from
    /// `Pending`; returns whether it took effect.
    pub fn mark_ready_for_upload(&mut self, hash: [u8; 32], cancel: Option<UploadCancel>) -> bool {
        if self.state != BlockState::Pending {
            return false;
        }
        self.hash = Some(hash);
        self.upload_cancel = cancel;
        self.state = BlockState::ReadyForUpload;
        true
    }

    /// `Pending`/`ReadyForUpload` -> `Uploading` (claim, no data movement).
    /// A legitimate claim is not an invalidation: the `upload_cancel` hook is
    /// dropped without being invoked (it exists to notify of a write
    /// stealing the block out from under a claimed upload, not to fire on
    /// the claim itself).
    pub fn mark_uploading(&mut self) -> bool {
        match self.state {
            BlockState::Pending | BlockState::ReadyForUpload => {
                self.upload_cancel = None;
                self.state = BlockState::Uploading;
                true
            }
            _ => false,
        }
    }

    /// `Pending`/`ReadyForUpload` -> `Uploading`, zero-copy: takes `data` out
    /// of the buffer. Returns `(data, data_size)` on success.
    pub fn detach_for_upload(&mut self) -> Option<(Box<[u8]>, usize)> {
        if !self.mark_uploading() {
            return None;
        }
        let data = self.data.take()?;
        Some((data, self.data_size))
    }

    /// `Uploading` -> `Pending` on upload failure; restores the buffer.
    pub fn restore(&mut self, data: Box<[u8]>) -> bool {
        if self.state != BlockState::Uploading {
            return false;
        }
        self.data = Some(data);
        self.state = BlockState::Pending;
        true
    }

    /// `Uploading` -> `Pending`, without restoring data (buffer was never
    /// detached, e.g. `mark_uploading` claim path failed downstream).
    pub fn mark_pending(&mut self) -> bool {
        if self.state != BlockState::Uploading {
            return false;
        }
        self.state = BlockState::Pending;
        true
    }

    /// `Uploading` -> `Uploaded`. Idempotent: calling twice leaves state
    /// `Uploaded` and returns `false` the second time (no double charge to
    /// the caller's bookkeeping).
    pub fn mark_uploaded(&mut self) -> bool {
        if self.state == BlockState::Uploaded {
            return false;
        }
        self.state = BlockState::Uploaded;
        true
    }

    /// Any write invalidates a `ReadyForUpload` block: fires the cancel
    /// callback, clears `hash`, reverts to `Pending`.
    pub fn invalidate_ready_for_upload(&mut self) {
        if self.state == BlockState::ReadyForUpload {
            self.fire_cancel();
            self.hash = None;
            self.state = BlockState::Pending;
        }
    }

    /// Re-dirty an `Uploaded` block on a new write.
    pub fn redirty(&mut self) {
        self.state = BlockState::Pending;
    }

    fn fire_cancel(&mut self) {
        if let Some(cancel) = self.upload_cancel.take() {
            cancel();
        }
    }

    /// Construct a detached `Uploaded` placeholder, used only by WAL replay
    /// when a `BlockUploaded` marker arrives for a block never otherwise
    /// created (replay order edge case: marker without a prior write in the
    /// retained log window).
    pub fn new_uploaded_placeholder() -> Self {
        Self::new_detached(BlockState::Uploaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let mut block = BlockBuffer::new(BlockState::Pending);
        block.write_at(0, b"AAAAAAAAAA");
        block.write_at(3, b"BBB");
        let mut out = [0u8; 10];
        block.read_at(0, &mut out);
        assert_eq!(&out, b"AAABBBAAAA");
        assert_eq!(block.data_size(), 10);
    }

    #[test]
    fn ready_for_upload_is_idempotent_from_pending_only() {
        let mut block = BlockBuffer::new(BlockState::Pending);
        assert!(block.mark_ready_for_upload([0u8; 32], None));
        assert_eq!(block.state(), BlockState::ReadyForUpload);
        assert!(!block.mark_ready_for_upload([1u8; 32], None));
    }

    #[test]
    fn write_invalidates_ready_for_upload_and_fires_cancel_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut block = BlockBuffer::new(BlockState::Pending);
        block.mark_ready_for_upload(
            [7u8; 32],
            Some(Box::new(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
            })),
        );
        block.invalidate_ready_for_upload();
        assert_eq!(block.state(), BlockState::Pending);
        assert!(block.hash().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // invalidating again (already Pending) must not refire
        block.invalidate_ready_for_upload();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detach_then_restore_roundtrip() {
        let mut block = BlockBuffer::new(BlockState::Pending);
        block.write_at(0, b"hello");
        let (data, size) = block.detach_for_upload().unwrap();
        assert!(!block.is_attached());
        assert_eq!(block.state(), BlockState::Uploading);
        assert_eq!(size, 5);

        assert!(block.restore(data));
        assert!(block.is_attached());
        assert_eq!(block.state(), BlockState::Pending);
        let mut out = [0u8; 5];
        block.read_at(0, &mut out);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn mark_uploaded_is_idempotent() {
        let mut block = BlockBuffer::new(BlockState::Pending);
        assert!(block.mark_uploading());
        assert!(block.mark_uploaded());
        assert_eq!(block.state(), BlockState::Uploaded);
        assert!(!block.mark_uploaded());
        assert_eq!(block.state(), BlockState::Uploaded);
    }

    #[test]
    fn uploading_claim_rejects_second_claimant() {
        let mut block = BlockBuffer::new(BlockState::Pending);
        assert!(block.mark_uploading());
        assert!(!block.mark_uploading());
    }

    #[test]
    fn legitimate_claim_does_not_fire_cancel() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut block = BlockBuffer::new(BlockState::Pending);
        block.mark_ready_for_upload(
            [1u8; 32],
            Some(Box::new(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
            })),
        );
        assert!(block.mark_uploading());
        assert_eq!(block.state(), BlockState::Uploading);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
