//! sFlow v5 wire-format decoder.
//!
//! The datagram is XDR-encoded: big-endian 32-bit integers, opaque byte
//! arrays padded to 4-byte boundaries, and every sample and record
//! carrying a declared length in its header. The decoder always seeks to
//! the declared end of an element after its inner decode returns, so a
//! malformed or unknown inner element corrupts at most its own payload.

// The record structs mirror the wire format in full; not every decoded
// field is reported downstream.
#![allow(dead_code)]

use std::net::IpAddr;

use thiserror::Error;

pub const SFLOW_VERSION: u32 = 5;

pub const ADDRESS_FAMILY_IPV4: u32 = 1;
pub const ADDRESS_FAMILY_IPV6: u32 = 2;

// Sample formats according to https://sflow.org/SFLOW-DATAGRAM5.txt
pub const SAMPLE_FORMAT_FLOW: u32 = 1;
pub const SAMPLE_FORMAT_COUNTER: u32 = 2;
pub const SAMPLE_FORMAT_EXPANDED_FLOW: u32 = 3;
pub const SAMPLE_FORMAT_EXPANDED_COUNTER: u32 = 4;
pub const SAMPLE_FORMAT_DROP: u32 = 5;

// Flow record formats according to https://sflow.org/SFLOW-STRUCTS5.txt
pub const RECORD_RAW_HEADER: u32 = 1;
pub const RECORD_ETHERNET: u32 = 2;
pub const RECORD_IPV4: u32 = 3;
pub const RECORD_IPV6: u32 = 4;
pub const RECORD_EXT_SWITCH: u32 = 1001;
pub const RECORD_EXT_ROUTER: u32 = 1002;
pub const RECORD_EXT_GATEWAY: u32 = 1003;

pub const AS_PATH_SEGMENT_SET: u32 = 1;
pub const AS_PATH_SEGMENT_SEQUENCE: u32 = 2;

// Expanded interface encodings: format 0 carries an ifIndex, 1 means the
// packet was discarded, 2 means multiple output interfaces.
const INTERFACE_FORMAT_INDEX: u32 = 0;

// Allocation caps against absurd counts in hostile datagrams; real
// agents stay far below all of these.
const MAX_PREALLOC_SAMPLES: usize = 64;
const MAX_FLOW_RECORDS: u32 = 1024;
const MAX_AS_PATH_SEGMENTS: u32 = 64;
const MAX_AS_PATH_HOPS: u32 = 1024;
const MAX_COMMUNITIES: u32 = 1024;

/// Fatal per-datagram decode failures. Anything softer is skipped in
/// place and counted in [`DecodeStatus`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ended before a required outer-header field
    #[error("short read at {field}: need {need} bytes, have {have}")]
    ShortRead {
        field: &'static str,
        need: usize,
        have: usize,
    },

    /// Datagram version is not sFlow v5
    #[error("unsupported sflow version {got}")]
    UnsupportedVersion { got: u32 },

    /// Agent address family is neither IPv4 (1) nor IPv6 (2)
    #[error("unknown agent address family {family}")]
    BadAddressFamily { family: u32 },
}

/// Soft conditions observed while decoding one datagram. None of them
/// prevent the successfully parsed samples from producing flows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStatus {
    /// Samples with an unrecognized format code, skipped by length
    pub unknown_samples: u32,
    /// Flow samples whose fixed fields could not be read
    pub bad_samples: u32,
    /// Records with an unrecognized type code, skipped by length
    pub unknown_records: u32,
    /// Records of a known type whose payload could not be read
    pub bad_records: u32,
    /// The buffer ended before the declared sample count was reached
    pub truncated: bool,
}

impl DecodeStatus {
    pub fn ok(&self) -> bool {
        !self.truncated
    }
}

#[derive(Debug, PartialEq)]
pub struct Datagram {
    pub agent_address: IpAddr,
    pub sub_agent_id: u32,
    pub sequence_number: u32,
    pub uptime_ms: u32,
    pub samples: Vec<FlowSample>,
}

/// One flow sample. Classic (format 1) and expanded (format 3) samples
/// normalize to this same struct; nothing downstream can tell them
/// apart.
#[derive(Debug, PartialEq)]
pub struct FlowSample {
    pub sequence_number: u32,
    pub source_id_type: u32,
    pub source_id_value: u32,
    pub sampling_rate: u32,
    pub sample_pool: u32,
    pub drops: u32,
    pub input_if: u32,
    pub output_if: u32,
    pub records: Vec<FlowRecord>,
}

#[derive(Debug, PartialEq)]
pub enum FlowRecord {
    SampledHeader(SampledHeader),
    SampledEthernet(SampledEthernet),
    SampledIpv4(SampledIp),
    SampledIpv6(SampledIp),
    ExtendedSwitch(ExtendedSwitch),
    ExtendedRouter(ExtendedRouter),
    ExtendedGateway(ExtendedGateway),
}

#[derive(Debug, PartialEq)]
pub struct SampledHeader {
    pub protocol: u32,
    pub frame_length: u32,
    pub stripped: u32,
    pub header: Vec<u8>,
}

#[derive(Debug, PartialEq)]
pub struct SampledEthernet {
    pub frame_length: u32,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub etype: u32,
}

/// Shared shape of the sampled-IPv4 and sampled-IPv6 records. For IPv6
/// the `tos` field carries the priority word.
#[derive(Debug, PartialEq)]
pub struct SampledIp {
    pub length: u32,
    pub protocol: u32,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u32,
    pub dst_port: u32,
    pub tcp_flags: u32,
    pub tos: u32,
}

#[derive(Debug, PartialEq)]
pub struct ExtendedSwitch {
    pub src_vlan: u32,
    pub src_priority: u32,
    pub dst_vlan: u32,
    pub dst_priority: u32,
}

#[derive(Debug, PartialEq)]
pub struct ExtendedRouter {
    pub next_hop: IpAddr,
    pub src_mask_len: u32,
    pub dst_mask_len: u32,
}

#[derive(Debug, PartialEq)]
pub struct AsPathSegment {
    /// 1 = AS-SET (unordered), 2 = AS-SEQUENCE
    pub kind: u32,
    pub path: Vec<u32>,
}

#[derive(Debug, PartialEq)]
pub struct ExtendedGateway {
    pub next_hop: IpAddr,
    pub asn: u32,
    pub src_as: u32,
    pub src_peer_as: u32,
    pub segments: Vec<AsPathSegment>,
    pub communities: Vec<u32>,
    pub local_pref: u32,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        if self.remaining() < 4 {
            return Err(DecodeError::ShortRead {
                field,
                need: 4,
                have: self.remaining(),
            });
        }
        let value = u32::from_be_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(value)
    }

    fn read_bytes(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::ShortRead {
                field,
                need: len,
                have: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read an IP address prefixed by its XDR address-family word.
    fn read_address(&mut self, field: &'static str) -> Result<IpAddr, DecodeError> {
        let family = self.read_u32(field)?;
        match family {
            ADDRESS_FAMILY_IPV4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(self.read_bytes(field, 4)?);
                Ok(IpAddr::from(octets))
            }
            ADDRESS_FAMILY_IPV6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(self.read_bytes(field, 16)?);
                Ok(IpAddr::from(octets))
            }
            other => Err(DecodeError::BadAddressFamily { family: other }),
        }
    }

    fn read_mac(&mut self, field: &'static str) -> Result<[u8; 6], DecodeError> {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(self.read_bytes(field, 6)?);
        // MACs are padded to the 4-byte boundary
        self.read_bytes(field, 2)?;
        Ok(mac)
    }
}

/// Decode one UDP payload into a datagram tree. Fatal outer-header
/// failures return `Err`; everything recoverable is skipped in place and
/// reported through the returned [`DecodeStatus`].
pub fn decode_datagram(payload: &[u8]) -> Result<(Datagram, DecodeStatus), DecodeError> {
    let mut cur = Cursor::new(payload);
    let mut status = DecodeStatus::default();

    let version = cur.read_u32("version")?;
    if version != SFLOW_VERSION {
        return Err(DecodeError::UnsupportedVersion { got: version });
    }

    let agent_address = cur.read_address("agent_address")?;
    let sub_agent_id = cur.read_u32("sub_agent_id")?;
    let sequence_number = cur.read_u32("sequence_number")?;
    let uptime_ms = cur.read_u32("uptime")?;
    let sample_count = cur.read_u32("sample_count")?;

    let mut samples = Vec::with_capacity(sample_count.min(MAX_PREALLOC_SAMPLES as u32) as usize);
    for _ in 0..sample_count {
        let Ok(format) = cur.read_u32("sample_format") else {
            status.truncated = true;
            break;
        };
        let Ok(length) = cur.read_u32("sample_length") else {
            status.truncated = true;
            break;
        };
        let end = cur.pos() + length as usize;
        if end > payload.len() {
            // Declared frame overruns the buffer; nothing behind it can
            // be trusted.
            status.truncated = true;
            break;
        }

        match format {
            SAMPLE_FORMAT_FLOW | SAMPLE_FORMAT_EXPANDED_FLOW => {
                let expanded = format == SAMPLE_FORMAT_EXPANDED_FLOW;
                // Scoped cursor: the sample decode can never read past
                // its own declared frame.
                let body = &payload[cur.pos()..end];
                match decode_flow_sample(body, expanded, &mut status) {
                    Ok(sample) => samples.push(sample),
                    Err(_) => status.bad_samples += 1,
                }
            }
            SAMPLE_FORMAT_COUNTER | SAMPLE_FORMAT_EXPANDED_COUNTER | SAMPLE_FORMAT_DROP => {
                // Consumed by declared length, content discarded.
            }
            _ => status.unknown_samples += 1,
        }

        cur.seek(end);
    }

    Ok((
        Datagram {
            agent_address,
            sub_agent_id,
            sequence_number,
            uptime_ms,
            samples,
        },
        status,
    ))
}

fn decode_flow_sample(
    body: &[u8],
    expanded: bool,
    status: &mut DecodeStatus,
) -> Result<FlowSample, DecodeError> {
    let mut cur = Cursor::new(body);
    let sequence_number = cur.read_u32("sample_sequence_number")?;

    let (source_id_type, source_id_value) = if expanded {
        (
            cur.read_u32("source_id_type")?,
            cur.read_u32("source_id_value")?,
        )
    } else {
        let source_id = cur.read_u32("source_id")?;
        (source_id >> 24, source_id & 0x00ff_ffff)
    };

    let sampling_rate = cur.read_u32("sampling_rate")?;
    let sample_pool = cur.read_u32("sample_pool")?;
    let drops = cur.read_u32("drops")?;

    let (input_if, output_if) = if expanded {
        let in_format = cur.read_u32("input_if_format")?;
        let in_value = cur.read_u32("input_if_value")?;
        let out_format = cur.read_u32("output_if_format")?;
        let out_value = cur.read_u32("output_if_value")?;
        (
            if in_format == INTERFACE_FORMAT_INDEX { in_value } else { 0 },
            if out_format == INTERFACE_FORMAT_INDEX { out_value } else { 0 },
        )
    } else {
        (cur.read_u32("input_if")?, cur.read_u32("output_if")?)
    };

    let record_count = cur.read_u32("flow_record_count")?;
    let capped = record_count.min(MAX_FLOW_RECORDS);

    let mut records = Vec::with_capacity(capped.min(16) as usize);
    for _ in 0..capped {
        let Ok(data_format) = cur.read_u32("record_format") else {
            status.bad_records += 1;
            break;
        };
        let Ok(length) = cur.read_u32("record_length") else {
            status.bad_records += 1;
            break;
        };
        let record_end = cur.pos() + length as usize;
        if record_end > body.len() {
            status.bad_records += 1;
            break;
        }

        // Scoped cursor again: a record whose declared length lies about
        // its content fails inside its own window, never in a neighbor's.
        let mut record_cur = Cursor::new(&body[cur.pos()..record_end]);
        match decode_flow_record(&mut record_cur, data_format) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => status.unknown_records += 1,
            Err(_) => status.bad_records += 1,
        }

        cur.seek(record_end);
    }

    Ok(FlowSample {
        sequence_number,
        source_id_type,
        source_id_value,
        sampling_rate,
        sample_pool,
        drops,
        input_if,
        output_if,
        records,
    })
}

/// Decode one flow record body. `Ok(None)` means the type code is not
/// recognized; the caller skips it using the declared length.
fn decode_flow_record(
    cur: &mut Cursor<'_>,
    data_format: u32,
) -> Result<Option<FlowRecord>, DecodeError> {
    let record = match data_format {
        RECORD_RAW_HEADER => {
            let protocol = cur.read_u32("raw.protocol")?;
            let frame_length = cur.read_u32("raw.frame_length")?;
            let stripped = cur.read_u32("raw.stripped")?;
            let header_length = cur.read_u32("raw.header_length")? as usize;
            let header = cur.read_bytes("raw.header", header_length)?.to_vec();
            FlowRecord::SampledHeader(SampledHeader {
                protocol,
                frame_length,
                stripped,
                header,
            })
        }
        RECORD_ETHERNET => {
            let frame_length = cur.read_u32("ethernet.frame_length")?;
            let src_mac = cur.read_mac("ethernet.src_mac")?;
            let dst_mac = cur.read_mac("ethernet.dst_mac")?;
            let etype = cur.read_u32("ethernet.etype")?;
            FlowRecord::SampledEthernet(SampledEthernet {
                frame_length,
                src_mac,
                dst_mac,
                etype,
            })
        }
        RECORD_IPV4 => FlowRecord::SampledIpv4(decode_sampled_ip(cur, false)?),
        RECORD_IPV6 => FlowRecord::SampledIpv6(decode_sampled_ip(cur, true)?),
        RECORD_EXT_SWITCH => FlowRecord::ExtendedSwitch(ExtendedSwitch {
            src_vlan: cur.read_u32("switch.src_vlan")?,
            src_priority: cur.read_u32("switch.src_priority")?,
            dst_vlan: cur.read_u32("switch.dst_vlan")?,
            dst_priority: cur.read_u32("switch.dst_priority")?,
        }),
        RECORD_EXT_ROUTER => FlowRecord::ExtendedRouter(ExtendedRouter {
            next_hop: cur.read_address("router.next_hop")?,
            src_mask_len: cur.read_u32("router.src_mask_len")?,
            dst_mask_len: cur.read_u32("router.dst_mask_len")?,
        }),
        RECORD_EXT_GATEWAY => FlowRecord::ExtendedGateway(decode_extended_gateway(cur)?),
        _ => return Ok(None),
    };

    Ok(Some(record))
}

fn decode_sampled_ip(cur: &mut Cursor<'_>, v6: bool) -> Result<SampledIp, DecodeError> {
    let length = cur.read_u32("sampled_ip.length")?;
    let protocol = cur.read_u32("sampled_ip.protocol")?;

    let (src_addr, dst_addr) = if v6 {
        let mut src = [0u8; 16];
        src.copy_from_slice(cur.read_bytes("sampled_ip.src_addr", 16)?);
        let mut dst = [0u8; 16];
        dst.copy_from_slice(cur.read_bytes("sampled_ip.dst_addr", 16)?);
        (IpAddr::from(src), IpAddr::from(dst))
    } else {
        let mut src = [0u8; 4];
        src.copy_from_slice(cur.read_bytes("sampled_ip.src_addr", 4)?);
        let mut dst = [0u8; 4];
        dst.copy_from_slice(cur.read_bytes("sampled_ip.dst_addr", 4)?);
        (IpAddr::from(src), IpAddr::from(dst))
    };

    let src_port = cur.read_u32("sampled_ip.src_port")?;
    let dst_port = cur.read_u32("sampled_ip.dst_port")?;
    let tcp_flags = cur.read_u32("sampled_ip.tcp_flags")?;
    let tos = cur.read_u32("sampled_ip.tos")?;

    Ok(SampledIp {
        length,
        protocol,
        src_addr,
        dst_addr,
        src_port,
        dst_port,
        tcp_flags,
        tos,
    })
}

fn decode_extended_gateway(cur: &mut Cursor<'_>) -> Result<ExtendedGateway, DecodeError> {
    let next_hop = cur.read_address("gateway.next_hop")?;
    let asn = cur.read_u32("gateway.as")?;
    let src_as = cur.read_u32("gateway.src_as")?;
    let src_peer_as = cur.read_u32("gateway.src_peer_as")?;

    let segment_count = cur.read_u32("gateway.segment_count")?;
    if segment_count > MAX_AS_PATH_SEGMENTS {
        return Err(DecodeError::ShortRead {
            field: "gateway.segment_count",
            need: segment_count as usize,
            have: cur.remaining(),
        });
    }

    let mut segments = Vec::with_capacity(segment_count as usize);
    for _ in 0..segment_count {
        let kind = cur.read_u32("gateway.segment_type")?;
        let hops = cur.read_u32("gateway.segment_length")?;
        if hops > MAX_AS_PATH_HOPS || hops as usize * 4 > cur.remaining() {
            return Err(DecodeError::ShortRead {
                field: "gateway.as_path",
                need: hops as usize * 4,
                have: cur.remaining(),
            });
        }
        let mut path = Vec::with_capacity(hops as usize);
        for _ in 0..hops {
            path.push(cur.read_u32("gateway.as_path")?);
        }
        segments.push(AsPathSegment { kind, path });
    }

    let community_count = cur.read_u32("gateway.community_count")?;
    if community_count > MAX_COMMUNITIES || community_count as usize * 4 > cur.remaining() {
        return Err(DecodeError::ShortRead {
            field: "gateway.communities",
            need: community_count as usize * 4,
            have: cur.remaining(),
        });
    }
    let mut communities = Vec::with_capacity(community_count as usize);
    for _ in 0..community_count {
        communities.push(cur.read_u32("gateway.communities")?);
    }

    let local_pref = cur.read_u32("gateway.local_pref")?;

    Ok(ExtendedGateway {
        next_hop,
        asn,
        src_as,
        src_peer_as,
        segments,
        communities,
        local_pref,
    })
}
