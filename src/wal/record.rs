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

//! WAL record encoding/decoding. All integers little-endian.

use crate::error::{self, Result};

pub const TYPE_SLICE_WRITE: u8 = 0;
pub const TYPE_DELETE: u8 = 1;
pub const TYPE_TRUNCATE: u8 = 2;
pub const TYPE_REMOVE: u8 = 3;
pub const TYPE_BLOCK_UPLOADED: u8 = 4;
pub const TYPE_BLOCK_WRITE: u8 = 5;

/// One record of the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    BlockWrite {
        payload_id: String,
        chunk_index: u32,
        block_index: u32,
        offset_in_block: u32,
        data: Vec<u8>,
    },
    BlockUploaded {
        payload_id: String,
        chunk_index: u32,
        block_index: u32,
    },
    Remove {
        payload_id: String,
    },
    /// A legacy record type (0-2) encountered at replay. Never produced by
    /// `encode`; self-describing length lets replay skip it without
    /// understanding its payload, since the legacy layout is undocumented.
    Legacy(u8),
}

impl WalRecord {
    /// Encode into `buf`, appending bytes (does not clear `buf`), followed
    /// by a trailing CRC32 over everything just appended. Replay uses the
    /// checksum to tell a genuinely corrupted record apart from one merely
    /// truncated by a length field gone bad.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let body_start = buf.len();
        self.encode_body(buf);
        let checksum = crc32fast::hash(&buf[body_start..]);
        buf.extend_from_slice(&checksum.to_le_bytes());
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            WalRecord::BlockWrite {
                payload_id,
                chunk_index,
                block_index,
                offset_in_block,
                data,
            } => {
                buf.push(TYPE_BLOCK_WRITE);
                write_payload_id(buf, payload_id);
                buf.extend_from_slice(&chunk_index.to_le_bytes());
                buf.extend_from_slice(&block_index.to_le_bytes());
                buf.extend_from_slice(&offset_in_block.to_le_bytes());
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buf.extend_from_slice(data);
            }
            WalRecord::BlockUploaded {
                payload_id,
                chunk_index,
                block_index,
            } => {
                buf.push(TYPE_BLOCK_UPLOADED);
                write_payload_id(buf, payload_id);
                buf.extend_from_slice(&chunk_index.to_le_bytes());
                buf.extend_from_slice(&block_index.to_le_bytes());
            }
            WalRecord::Remove { payload_id } => {
                buf.push(TYPE_REMOVE);
                write_payload_id(buf, payload_id);
            }
            WalRecord::Legacy(_) => {
                unreachable!("this implementation never writes legacy record types")
            }
        }
    }

    /// Encoded byte length, computed without allocating. Includes the
    /// trailing CRC32 written by `encode`.
    pub fn encoded_len(&self) -> usize {
        match self {
            WalRecord::BlockWrite {
                payload_id, data, ..
            } => 1 + 2 + payload_id.len() + 4 + 4 + 4 + 4 + data.len() + 4,
            WalRecord::BlockUploaded { payload_id, .. } => 1 + 2 + payload_id.len() + 4 + 4 + 4,
            WalRecord::Remove { payload_id } => 1 + 2 + payload_id.len() + 4,
            WalRecord::Legacy(_) => 0,
        }
    }

    /// Decode one record starting at `bytes[0]`. Returns `(record,
    /// bytes_consumed)`.
    pub fn decode(bytes: &[u8]) -> Result<(WalRecord, usize)> {
        let type_code = *bytes.first().ok_or_else(|| corrupted("truncated record header"))?;
        let rest = &bytes[1..];
        match type_code {
            TYPE_BLOCK_WRITE => {
                let mut cursor = 0usize;
                let payload_id = read_payload_id(rest, &mut cursor)?;
                let chunk_index = read_u32(rest, &mut cursor)?;
                let block_index = read_u32(rest, &mut cursor)?;
                let offset_in_block = read_u32(rest, &mut cursor)?;
                let data_len = read_u32(rest, &mut cursor)? as usize;
                let data = rest
                    .get(cursor..cursor + data_len)
                    .ok_or_else(|| corrupted("truncated BlockWrite payload"))?
                    .to_vec();
                cursor += data_len;
                let consumed = verify_checksum(bytes, 1 + cursor)?;
                Ok((
                    WalRecord::BlockWrite {
                        payload_id,
                        chunk_index,
                        block_index,
                        offset_in_block,
                        data,
                    },
                    consumed,
                ))
            }
            TYPE_BLOCK_UPLOADED => {
                let mut cursor = 0usize;
                let payload_id = read_payload_id(rest, &mut cursor)?;
                let chunk_index = read_u32(rest, &mut cursor)?;
                let block_index = read_u32(rest, &mut cursor)?;
                let consumed = verify_checksum(bytes, 1 + cursor)?;
                Ok((
                    WalRecord::BlockUploaded {
                        payload_id,
                        chunk_index,
                        block_index,
                    },
                    consumed,
                ))
            }
            TYPE_REMOVE => {
                let mut cursor = 0usize;
                let payload_id = read_payload_id(rest, &mut cursor)?;
                let consumed = verify_checksum(bytes, 1 + cursor)?;
                Ok((WalRecord::Remove { payload_id }, consumed))
            }
            TYPE_SLICE_WRITE | TYPE_DELETE | TYPE_TRUNCATE => {
                let mut cursor = 0usize;
                let len = read_u32(rest, &mut cursor)? as usize;
                if rest.len() < cursor + len {
                    return Err(corrupted("truncated legacy record"));
                }
                Ok((WalRecord::Legacy(type_code), 1 + cursor + len))
            }
            other => Err(corrupted(format!("unknown WAL record type {other}"))),
        }
    }
}

fn write_payload_id(buf: &mut Vec<u8>, payload_id: &str) {
    let bytes = payload_id.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn read_payload_id(bytes: &[u8], cursor: &mut usize) -> Result<String> {
    let len = read_u16(bytes, cursor)? as usize;
    let slice = bytes
        .get(*cursor..*cursor + len)
        .ok_or_else(|| corrupted("truncated payload_id"))?;
    *cursor += len;
    String::from_utf8(slice.to_vec()).map_err(|_| corrupted("payload_id is not valid utf-8"))
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    let slice = bytes
        .get(*cursor..*cursor + 2)
        .ok_or_else(|| corrupted("truncated u16 field"))?;
    *cursor += 2;
    Ok(u16::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = bytes
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| corrupted("truncated u32 field"))?;
    *cursor += 4;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

/// Check the CRC32 trailing a record body of `body_len` bytes (the type
/// byte through the last payload byte, inclusive). Returns the total bytes
/// consumed (`body_len + 4`) on success.
fn verify_checksum(bytes: &[u8], body_len: usize) -> Result<usize> {
    let checksum_bytes = bytes
        .get(body_len..body_len + 4)
        .ok_or_else(|| corrupted("truncated record checksum"))?;
    let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
    let actual = crc32fast::hash(&bytes[..body_len]);
    if actual != expected {
        return Err(corrupted("record checksum mismatch"));
    }
    Ok(body_len + 4)
}

fn corrupted(detail: impl Into<String>) -> error::Error {
    error::MmapCorrupted {
        detail: detail.into(),
    }
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_write_roundtrip() {
        let record = WalRecord::BlockWrite {
            payload_id: "f".to_string(),
            chunk_index: 1,
            block_index: 2,
            offset_in_block: 4,
            data: b"hello".to_vec(),
        };
        let mut buf = Vec::new();
        record.encode(&mut buf);
        assert_eq!(buf.len(), record.encoded_len());
        let (decoded, consumed) = WalRecord::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn block_uploaded_roundtrip() {
        let record = WalRecord::BlockUploaded {
            payload_id: "f".to_string(),
            chunk_index: 0,
            block_index: 0,
        };
        let mut buf = Vec::new();
        record.encode(&mut buf);
        let (decoded, consumed) = WalRecord::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn remove_roundtrip() {
        let record = WalRecord::Remove {
            payload_id: "bigfile".to_string(),
        };
        let mut buf = Vec::new();
        record.encode(&mut buf);
        let (decoded, _) = WalRecord::decode(&buf).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let record = WalRecord::Remove {
            payload_id: "f".to_string(),
        };
        let mut buf = Vec::new();
        record.encode(&mut buf);
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(WalRecord::decode(&buf).is_err());
    }

    #[test]
    fn truncated_record_is_corruption() {
        let record = WalRecord::Remove {
            payload_id: "f".to_string(),
        };
        let mut buf = Vec::new();
        record.encode(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(WalRecord::decode(&buf).is_err());
    }
}
