//! Builders that synthesise small geolocation databases for tests.

use std::collections::BTreeMap;
use std::net::IpAddr;

use super::types::IpFamily;

const XDB_HEADER_LEN: usize = 256;
const XDB_VECTOR_LEN: usize = 256 * 256 * 8;

fn octets(ip: &str) -> Vec<u8> {
    match ip.parse::<IpAddr>().expect("test ip") {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Writes ip2region structure-3 buffers.
pub struct XdbBuilder {
    family: IpFamily,
    created_at: u32,
    ranges: Vec<(Vec<u8>, Vec<u8>, String)>,
}

impl XdbBuilder {
    pub fn new(family: IpFamily) -> Self {
        Self {
            family,
            created_at: 1_700_000_000,
            ranges: Vec::new(),
        }
    }

    pub fn range(mut self, start: &str, end: &str, region: &str) -> Self {
        self.ranges
            .push((octets(start), octets(end), region.to_string()));
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.ranges.sort_by(|a, b| a.0.cmp(&b.0));
        let ip_len = match self.family {
            IpFamily::V4 => 4,
            IpFamily::V6 => 16,
        };
        let segment = ip_len * 2 + 6;
        let seg_start = XDB_HEADER_LEN + XDB_VECTOR_LEN;
        let data_start = seg_start + self.ranges.len() * segment;

        let mut buf = vec![0u8; seg_start];
        buf[0..2].copy_from_slice(&3u16.to_le_bytes());
        buf[2..4].copy_from_slice(&1u16.to_le_bytes());
        buf[4..8].copy_from_slice(&self.created_at.to_le_bytes());
        buf[8..12].copy_from_slice(&(seg_start as u32).to_le_bytes());
        let last = seg_start + self.ranges.len().saturating_sub(1) * segment;
        buf[12..16].copy_from_slice(&(last as u32).to_le_bytes());
        let version: u16 = if ip_len == 4 { 4 } else { 6 };
        buf[16..18].copy_from_slice(&version.to_le_bytes());
        buf[18..20].copy_from_slice(&4u16.to_le_bytes());

        let mut data = Vec::new();
        for (start, end, region) in &self.ranges {
            let mut put_ip = |ip: &Vec<u8>| {
                if ip_len == 4 {
                    buf.extend(ip.iter().rev());
                } else {
                    buf.extend_from_slice(ip);
                }
            };
            put_ip(start);
            put_ip(end);
            buf.extend_from_slice(&(region.len() as u16).to_le_bytes());
            buf.extend_from_slice(&((data_start + data.len()) as u32).to_le_bytes());
            data.extend_from_slice(region.as_bytes());
        }
        buf.extend_from_slice(&data);

        for b0 in 0..256usize {
            for b1 in 0..256usize {
                let slot = [b0 as u8, b1 as u8];
                let hits: Vec<usize> = self
                    .ranges
                    .iter()
                    .enumerate()
                    .filter(|(_, (s, e, _))| s[..2] <= slot[..] && slot[..] <= e[..2])
                    .map(|(i, _)| i)
                    .collect();
                if let (Some(first), Some(last)) = (hits.first(), hits.last()) {
                    let offset = XDB_HEADER_LEN + b0 * 256 * 8 + b1 * 8;
                    let s_ptr = (seg_start + first * segment) as u32;
                    let e_ptr = (seg_start + last * segment) as u32;
                    buf[offset..offset + 4].copy_from_slice(&s_ptr.to_le_bytes());
                    buf[offset + 4..offset + 8].copy_from_slice(&e_ptr.to_le_bytes());
                }
            }
        }

        buf
    }
}

#[derive(Clone, Copy)]
enum Child {
    Empty,
    Node(usize),
    Data(usize),
}

/// Writes MaxMind DB (format 2.0, 24 bit records) country databases.
pub struct MmdbBuilder {
    ip_version: u16,
    networks: Vec<(Vec<u8>, u8, BTreeMap<String, String>)>,
}

impl MmdbBuilder {
    pub fn new(ip_version: u16) -> Self {
        Self {
            ip_version,
            networks: Vec::new(),
        }
    }

    /// Map `network/prefix` to a country with the given localized names.
    pub fn country(mut self, network: &str, prefix: u8, names: &[(&str, &str)]) -> Self {
        let names = names
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.networks.push((octets(network), prefix, names));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut nodes: Vec<[Child; 2]> = vec![[Child::Empty, Child::Empty]];
        for (index, (addr, prefix, _)) in self.networks.iter().enumerate() {
            let mut node = 0usize;
            for depth in 0..*prefix as usize {
                let bit = ((addr[depth / 8] >> (7 - depth % 8)) & 1) as usize;
                if depth + 1 == *prefix as usize {
                    nodes[node][bit] = Child::Data(index);
                } else {
                    node = match nodes[node][bit] {
                        Child::Node(next) => next,
                        _ => {
                            nodes.push([Child::Empty, Child::Empty]);
                            let next = nodes.len() - 1;
                            nodes[node][bit] = Child::Node(next);
                            next
                        }
                    };
                }
            }
        }

        let mut data = Vec::new();
        let mut offsets = Vec::new();
        for (_, _, names) in &self.networks {
            offsets.push(data.len());
            encode_map_header(&mut data, 1);
            encode_str(&mut data, "country");
            encode_map_header(&mut data, 1);
            encode_str(&mut data, "names");
            encode_map_header(&mut data, names.len());
            for (lang, name) in names {
                encode_str(&mut data, lang);
                encode_str(&mut data, name);
            }
        }

        let node_count = nodes.len();
        let record = |child: Child| -> u32 {
            match child {
                Child::Empty => node_count as u32,
                Child::Node(n) => n as u32,
                Child::Data(i) => (node_count + 16 + offsets[i]) as u32,
            }
        };

        let mut buf = Vec::new();
        for [left, right] in &nodes {
            buf.extend_from_slice(&record(*left).to_be_bytes()[1..]);
            buf.extend_from_slice(&record(*right).to_be_bytes()[1..]);
        }
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&data);

        buf.extend_from_slice(b"\xAB\xCD\xEFMaxMind.com");
        encode_map_header(&mut buf, 9);
        encode_str(&mut buf, "binary_format_major_version");
        encode_uint(&mut buf, 5, 2);
        encode_str(&mut buf, "binary_format_minor_version");
        encode_uint(&mut buf, 5, 0);
        encode_str(&mut buf, "build_epoch");
        encode_uint(&mut buf, 9, 1_700_000_000);
        encode_str(&mut buf, "database_type");
        encode_str(&mut buf, "GeoLite2-Country");
        encode_str(&mut buf, "description");
        encode_map_header(&mut buf, 1);
        encode_str(&mut buf, "en");
        encode_str(&mut buf, "test database");
        encode_str(&mut buf, "ip_version");
        encode_uint(&mut buf, 5, self.ip_version as u64);
        encode_str(&mut buf, "languages");
        buf.push(2);
        buf.push(11 - 7);
        encode_str(&mut buf, "en");
        encode_str(&mut buf, "zh-CN");
        encode_str(&mut buf, "node_count");
        encode_uint(&mut buf, 6, node_count as u64);
        encode_str(&mut buf, "record_size");
        encode_uint(&mut buf, 5, 24);

        buf
    }
}

fn encode_str(buf: &mut Vec<u8>, s: &str) {
    assert!(s.len() < 29, "short strings only");
    buf.push(0x40 | s.len() as u8);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_map_header(buf: &mut Vec<u8>, len: usize) {
    assert!(len < 29);
    buf.push(0xE0 | len as u8);
}

/// `kind` is the MaxMind type number: 5 = uint16, 6 = uint32, 9 = uint64.
fn encode_uint(buf: &mut Vec<u8>, kind: u8, value: u64) {
    let bytes: Vec<u8> = value
        .to_be_bytes()
        .iter()
        .copied()
        .skip_while(|b| *b == 0)
        .collect();
    if kind <= 7 {
        buf.push((kind << 5) | bytes.len() as u8);
    } else {
        buf.push(bytes.len() as u8);
        buf.push(kind - 7);
    }
    buf.extend_from_slice(&bytes);
}
