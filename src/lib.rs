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

//! An in-memory, write-back block-buffer cache that sits between a
//! file-serving protocol layer and a remote content-addressed block store.
//!
//! Writes land in fixed-size blocks within fixed-size chunks, tracked by a
//! per-block coverage bitmap so partial writes can be told apart from holes.
//! An uploader drains dirty blocks through [`block::BlockState`]'s
//! Pending -> ReadyForUpload -> Uploading -> Uploaded progression; only
//! `Uploaded` blocks are ever evicted. An optional memory-mapped
//! write-ahead log makes writes and upload completions durable across a
//! crash, replayed back into memory on the next [`Cache::new_with_wal`].

mod atomic_util;
mod block;
mod cache;
mod cancellation;
mod config;
mod constants;
mod coverage;
mod error;
mod eviction;
mod file_entry;
mod macros;
mod metrics;
mod wal;

pub use block::{BlockState, UploadCancel};
pub use cache::{Cache, DirtyBlockMeta};
pub use cancellation::CancellationToken;
pub use config::{CacheBuilder, CacheConfig, WalConfig};
pub use constants::{
    BLOCK_SIZE, BLOCKS_PER_CHUNK, CHUNK_SIZE, COVERAGE_GRANULARITY, DEFAULT_MAX_PENDING_SIZE,
};
pub use coverage::Coverage;
pub use error::{Error, Result};
pub use metrics::Stats;
