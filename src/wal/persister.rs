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

//! Append-only record log over a grown-on-demand memory-mapped file.

use std::fs::{File, OpenOptions};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use memmap2::MmapMut;
use parking_lot::Mutex;
use snafu::ResultExt;

use crate::config::WalConfig;
use crate::error::{self, Result};
use crate::wal::record::WalRecord;

const MAGIC: &[u8; 4] = b"DTTC";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 64;
const SUPPORTED_VERSION: u16 = VERSION;

struct Header {
    entry_count: u32,
    next_offset: u64,
    total_data_size: u64,
}

impl Header {
    fn read_from(mmap: &[u8]) -> Result<Self> {
        if &mmap[0..4] != MAGIC {
            return error::MmapCorrupted {
                detail: "bad magic".to_string(),
            }
            .fail();
        }
        let version = u16::from_le_bytes(mmap[4..6].try_into().unwrap());
        if version != SUPPORTED_VERSION {
            return error::MmapVersionMismatch {
                found: version,
                supported: SUPPORTED_VERSION,
            }
            .fail();
        }
        let entry_count = u32::from_le_bytes(mmap[6..10].try_into().unwrap());
        let next_offset = u64::from_le_bytes(mmap[10..18].try_into().unwrap());
        let total_data_size = u64::from_le_bytes(mmap[18..26].try_into().unwrap());
        Ok(Self {
            entry_count,
            next_offset,
            total_data_size,
        })
    }

    fn write_fresh(mmap: &mut [u8]) {
        mmap[0..4].copy_from_slice(MAGIC);
        mmap[4..6].copy_from_slice(&VERSION.to_le_bytes());
        mmap[6..10].copy_from_slice(&0u32.to_le_bytes());
        mmap[10..18].copy_from_slice(&(HEADER_SIZE as u64).to_le_bytes());
        mmap[18..26].copy_from_slice(&0u64.to_le_bytes());
        mmap[26..HEADER_SIZE].fill(0);
    }

    fn write_into(&self, mmap: &mut [u8]) {
        mmap[0..4].copy_from_slice(MAGIC);
        mmap[4..6].copy_from_slice(&VERSION.to_le_bytes());
        mmap[6..10].copy_from_slice(&self.entry_count.to_le_bytes());
        mmap[10..18].copy_from_slice(&self.next_offset.to_le_bytes());
        mmap[18..26].copy_from_slice(&self.total_data_size.to_le_bytes());
    }
}

struct Inner {
    file: File,
    mmap: MmapMut,
    header: Header,
}

impl Inner {
    fn ensure_capacity(&mut self, required: u64) -> Result<()> {
        if (self.mmap.len() as u64) >= required {
            return Ok(());
        }
        self.mmap.flush().context(error::WalIo)?;
        let current_len = self.mmap.len() as u64;
        let new_len = current_len.saturating_mul(2).max(required);
        self.file.set_len(new_len).context(error::WalIo)?;
        // SAFETY: `file` has just been grown to `new_len` via `set_len`, so
        // the full mapped range is backed by allocated file space. The
        // previous mapping is dropped here before the new one is created.
        self.mmap = unsafe { MmapMut::map_mut(&self.file).context(error::WalIo)? };
        Ok(())
    }
}

/// Persists [`WalRecord`]s to a memory-mapped append-only file and replays
/// them back into a `Vec<WalRecord>` at open time.
pub struct WalPersister {
    inner: Mutex<Inner>,
    sync_on_every_write: bool,
}

impl WalPersister {
    pub fn open(config: WalConfig) -> Result<Self> {
        let path = config.path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .context(error::WalIo)?;

        #[cfg(unix)]
        {
            let mut perms = file.metadata().context(error::WalIo)?.permissions();
            perms.set_mode(0o644);
            file.set_permissions(perms).context(error::WalIo)?;
        }

        let file_len = file.metadata().context(error::WalIo)?.len();
        let is_fresh = file_len == 0;
        if is_fresh {
            file.set_len(config.initial_size.max(HEADER_SIZE as u64))
                .context(error::WalIo)?;
        }

        // SAFETY: `file` is open for read+write and has a non-zero length
        // (either pre-existing or just set via `set_len` above).
        let mut mmap = unsafe { MmapMut::map_mut(&file).context(error::WalIo)? };

        let header = if is_fresh {
            Header::write_fresh(&mut mmap);
            Header {
                entry_count: 0,
                next_offset: HEADER_SIZE as u64,
                total_data_size: 0,
            }
        } else {
            Header::read_from(&mmap)?
        };

        Ok(Self {
            inner: Mutex::new(Inner { file, mmap, header }),
            sync_on_every_write: config.sync_on_every_write,
        })
    }

    /// Append one record. Under the persister's own lock: grow the mapping
    /// if needed, write the record bytes in place, then update the header.
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let mut buf = Vec::with_capacity(record.encoded_len());
        record.encode(&mut buf);

        let mut inner = self.inner.lock();
        let start = inner.header.next_offset;
        let end = start + buf.len() as u64;
        inner.ensure_capacity(end)?;

        let start = start as usize;
        inner.mmap[start..start + buf.len()].copy_from_slice(&buf);

        inner.header.next_offset = end;
        inner.header.entry_count += 1;
        if let WalRecord::BlockWrite { data, .. } = record {
            inner.header.total_data_size += data.len() as u64;
        }
        let header = Header {
            entry_count: inner.header.entry_count,
            next_offset: inner.header.next_offset,
            total_data_size: inner.header.total_data_size,
        };
        header.write_into(&mut inner.mmap);

        if self.sync_on_every_write {
            inner.mmap.flush().context(error::WalIo)?;
        }
        Ok(())
    }

    /// Walk every record from offset 64 to `next_offset`, in write order.
    pub fn read_all(&self) -> Result<Vec<WalRecord>> {
        let inner = self.inner.lock();
        let mut records = Vec::with_capacity(inner.header.entry_count as usize);
        let mut offset = HEADER_SIZE;
        let limit = inner.header.next_offset as usize;
        while offset < limit {
            let (record, consumed) = WalRecord::decode(&inner.mmap[offset..limit])?;
            offset += consumed;
            records.push(record);
        }
        Ok(records)
    }

    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.mmap.flush().context(error::WalIo)
    }

    pub fn close(&self) -> Result<()> {
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_all_roundtrip() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new(dir.path());
        let persister = WalPersister::open(config).unwrap();

        persister
            .append(&WalRecord::BlockWrite {
                payload_id: "f".to_string(),
                chunk_index: 0,
                block_index: 0,
                offset_in_block: 0,
                data: b"persistent".to_vec(),
            })
            .unwrap();
        persister
            .append(&WalRecord::BlockUploaded {
                payload_id: "f".to_string(),
                chunk_index: 0,
                block_index: 0,
            })
            .unwrap();

        let records = persister.read_all().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn grows_past_initial_size() {
        let dir = tempdir().unwrap();
        let mut config = WalConfig::new(dir.path());
        config.initial_size = 128; // force growth quickly
        let persister = WalPersister::open(config).unwrap();

        let big = vec![7u8; 1024];
        for i in 0..10u32 {
            persister
                .append(&WalRecord::BlockWrite {
                    payload_id: "f".to_string(),
                    chunk_index: 0,
                    block_index: i,
                    offset_in_block: 0,
                    data: big.clone(),
                })
                .unwrap();
        }
        let records = persister.read_all().unwrap();
        assert_eq!(records.len(), 10);
    }

    #[test]
    fn reopen_preserves_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_path_buf();
        {
            let persister = WalPersister::open(WalConfig::new(&path)).unwrap();
            persister
                .append(&WalRecord::Remove {
                    payload_id: "gone".to_string(),
                })
                .unwrap();
            persister.close().unwrap();
        }
        let persister = WalPersister::open(WalConfig::new(&path)).unwrap();
        let records = persister.read_all().unwrap();
        assert_eq!(records.len(), 1);
    }
}
