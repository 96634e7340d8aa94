//! Buffer-backed searcher for ip2region `xdb` files.
//!
//! Layout:
//! - 256 byte header: version (u16), index policy (u16), build time (u32),
//!   first/last segment index pointers (u32), and since version 3 the ip
//!   version (u16) and runtime pointer width (u16). All little-endian.
//! - vector index: 256 x 256 slots of (start, end) segment index pointers,
//!   addressed by the first two address bytes.
//! - segment index blocks: start ip, end ip, data length (u16), data pointer
//!   (u32). IPv4 addresses are stored little-endian, IPv6 as raw bytes.
//! - region data.

use std::cmp::Ordering;
use std::net::IpAddr;

use crate::error::GeoError;

use super::types::IpFamily;

const HEADER_LEN: usize = 256;
const VECTOR_INDEX_COLS: usize = 256;
const VECTOR_INDEX_ROWS: usize = 256;
const VECTOR_INDEX_SIZE: usize = 8;
const VECTOR_INDEX_LEN: usize = VECTOR_INDEX_ROWS * VECTOR_INDEX_COLS * VECTOR_INDEX_SIZE;

const STRUCTURE_V2: u16 = 2;
const STRUCTURE_V3: u16 = 3;

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn invalid(reason: impl Into<String>) -> GeoError {
    GeoError::InvalidDatabase {
        source_kind: "ip2region",
        reason: reason.into(),
    }
}

/// Immutable searcher over an owned xdb buffer.
#[derive(Debug)]
pub struct XdbSearcher {
    family: IpFamily,
    buffer: Vec<u8>,
    created_at: u32,
}

impl XdbSearcher {
    /// Validate `buffer` as an xdb file for `family` and take ownership of it.
    pub fn from_buffer(family: IpFamily, buffer: Vec<u8>) -> Result<Self, GeoError> {
        if buffer.len() < HEADER_LEN + VECTOR_INDEX_LEN {
            return Err(invalid(format!(
                "buffer of {} bytes is smaller than header and vector index",
                buffer.len()
            )));
        }

        let version = read_u16(&buffer, 0).unwrap_or_default();
        let created_at = read_u32(&buffer, 4).unwrap_or_default();
        let start_ptr = read_u32(&buffer, 8).unwrap_or_default() as usize;
        let end_ptr = read_u32(&buffer, 12).unwrap_or_default() as usize;

        let stored_family = match version {
            STRUCTURE_V2 => IpFamily::V4,
            STRUCTURE_V3 => match read_u16(&buffer, 16).unwrap_or_default() {
                4 => IpFamily::V4,
                6 => IpFamily::V6,
                other => return Err(invalid(format!("unsupported ip version {}", other))),
            },
            other => return Err(invalid(format!("unsupported structure version {}", other))),
        };
        if stored_family != family {
            return Err(invalid(format!(
                "database holds {} data but was loaded as {}",
                stored_family, family
            )));
        }

        let searcher = Self {
            family,
            buffer,
            created_at,
        };
        let segment = searcher.segment_size();
        if start_ptr < HEADER_LEN + VECTOR_INDEX_LEN
            || end_ptr < start_ptr
            || end_ptr + segment > searcher.buffer.len()
            || (end_ptr - start_ptr) % segment != 0
        {
            return Err(invalid(format!(
                "segment index bounds {}..{} do not fit a {} byte buffer",
                start_ptr,
                end_ptr,
                searcher.buffer.len()
            )));
        }

        Ok(searcher)
    }

    pub fn family(&self) -> IpFamily {
        self.family
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Build time recorded in the header, seconds since the Unix epoch.
    pub fn created_at(&self) -> u32 {
        self.created_at
    }

    fn ip_len(&self) -> usize {
        match self.family {
            IpFamily::V4 => 4,
            IpFamily::V6 => 16,
        }
    }

    fn segment_size(&self) -> usize {
        self.ip_len() * 2 + 2 + 4
    }

    fn compare(&self, ip: &[u8], stored: &[u8]) -> Ordering {
        match self.family {
            IpFamily::V4 => {
                // stored little-endian
                let stored_be = [stored[3], stored[2], stored[1], stored[0]];
                ip.cmp(&stored_be[..])
            }
            IpFamily::V6 => ip.cmp(stored),
        }
    }

    /// Return the raw region string for `ip`, or an empty string if the
    /// address falls in no segment.
    pub fn search(&self, ip: IpAddr) -> Result<String, GeoError> {
        let octets: Vec<u8> = match (self.family, ip) {
            (IpFamily::V4, IpAddr::V4(v4)) => v4.octets().to_vec(),
            (IpFamily::V6, IpAddr::V6(v6)) => v6.octets().to_vec(),
            (family, other) => {
                return Err(invalid(format!("{} searcher cannot look up {}", family, other)))
            }
        };

        let slot = octets[0] as usize * VECTOR_INDEX_COLS * VECTOR_INDEX_SIZE
            + octets[1] as usize * VECTOR_INDEX_SIZE;
        let slot_offset = HEADER_LEN + slot;
        let (s_ptr, e_ptr) = match (
            read_u32(&self.buffer, slot_offset),
            read_u32(&self.buffer, slot_offset + 4),
        ) {
            (Some(s), Some(e)) => (s as usize, e as usize),
            _ => return Err(invalid("vector index truncated")),
        };
        if s_ptr == 0 || e_ptr < s_ptr {
            return Ok(String::new());
        }

        let ip_len = self.ip_len();
        let segment = self.segment_size();
        let mut low: isize = 0;
        let mut high: isize = ((e_ptr - s_ptr) / segment) as isize;

        while low <= high {
            let mid = (low + high) >> 1;
            let ptr = s_ptr + mid as usize * segment;
            let block = self
                .buffer
                .get(ptr..ptr + segment)
                .ok_or_else(|| invalid(format!("segment block at {} out of bounds", ptr)))?;

            if self.compare(&octets, &block[..ip_len]) == Ordering::Less {
                high = mid - 1;
            } else if self.compare(&octets, &block[ip_len..ip_len * 2]) == Ordering::Greater {
                low = mid + 1;
            } else {
                let data_len = read_u16(block, ip_len * 2).unwrap_or_default() as usize;
                let data_ptr = read_u32(block, ip_len * 2 + 2).unwrap_or_default() as usize;
                let data = self
                    .buffer
                    .get(data_ptr..data_ptr + data_len)
                    .ok_or_else(|| invalid(format!("region data at {} out of bounds", data_ptr)))?;
                return Ok(String::from_utf8_lossy(data).into_owned());
            }
        }

        Ok(String::new())
    }
}
