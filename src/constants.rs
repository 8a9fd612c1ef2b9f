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

//! Size constants shared by every module in this crate.

/// Size of a chunk: the unit of addressing above blocks.
pub const CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Size of a block buffer: the unit of memory accounting and upload.
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// One coverage bit covers this many bytes.
pub const COVERAGE_GRANULARITY: usize = 64;

/// Number of coverage bits per block.
pub const COVERAGE_BITS_PER_BLOCK: usize = BLOCK_SIZE / COVERAGE_GRANULARITY;

/// Number of 64-bit words backing a block's coverage bitmap.
pub const COVERAGE_WORDS_PER_BLOCK: usize = COVERAGE_BITS_PER_BLOCK / 64;

/// Default backpressure limit on pending (un-uploaded) memory.
pub const DEFAULT_MAX_PENDING_SIZE: u64 = 256 * 1024 * 1024;

/// Number of blocks per chunk, derived from the two size constants above.
pub const BLOCKS_PER_CHUNK: u64 = CHUNK_SIZE / BLOCK_SIZE as u64;
