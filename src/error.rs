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

//! Error taxonomy for the cache engine and its WAL persister.

use snafu::{Backtrace, Snafu};

use crate::macros::define_result;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "write range exceeds chunk size, offset:{offset}, len:{len}, chunk_size:{chunk_size}"
    ))]
    InvalidOffset {
        offset: u64,
        len: usize,
        chunk_size: u64,
    },

    #[snafu(display("block not found, payload:{payload_id}, chunk:{chunk_index}, block:{block_index}"))]
    BlockNotFound {
        payload_id: String,
        chunk_index: u32,
        block_index: u32,
    },

    #[snafu(display("chunk slice not found, payload:{payload_id}, chunk:{chunk_index}"))]
    SliceNotFound {
        payload_id: String,
        chunk_index: u32,
    },

    #[snafu(display("payload not present in cache: {payload_id}"))]
    FileNotInCache { payload_id: String },

    #[snafu(display("invalid chunk index {chunk_index} for payload {payload_id}"))]
    InvalidChunkIndex {
        payload_id: String,
        chunk_index: u32,
    },

    #[snafu(display("cache is closed"))]
    CacheClosed,

    #[snafu(display("operation cancelled"))]
    Cancelled,

    #[snafu(display("cache is full (total_size or pending_size ceiling reached)"))]
    CacheFull,

    #[snafu(display("WAL I/O error: {source}\nBacktrace:\n{backtrace}"))]
    WalIo {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("WAL append failed during write: {source}\nBacktrace:\n{backtrace}"))]
    WalAppend {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("WAL file is corrupted: {detail}\nBacktrace:\n{backtrace}"))]
    MmapCorrupted { detail: String, backtrace: Backtrace },

    #[snafu(display(
        "WAL file version mismatch, found:{found}, supported:{supported}\nBacktrace:\n{backtrace}"
    ))]
    MmapVersionMismatch {
        found: u16,
        supported: u16,
        backtrace: Backtrace,
    },
}

define_result!(Error);

impl Error {
    /// True for the backpressure signal callers are expected to retry after
    /// waiting for the uploader to drain. All other errors are terminal for
    /// the operation that produced them.
    pub fn is_cache_full(&self) -> bool {
        matches!(self, Error::CacheFull)
    }
}
