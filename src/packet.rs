//! Layer parser for the sampled packet header carried in RAW records.
//!
//! Walks Ethernet, 802.1Q tags, an MPLS label stack, IPv4/IPv6 and the
//! transport header out of untrusted bytes. Every read checks the
//! remaining length first; a short read terminates the walk cleanly with
//! the layer stack populated up to that point.

use crate::flow::{Flow, FieldValue, name};

// Header protocols of the RAW record, per SFLOW-STRUCTS5.txt.
pub const HEADER_PROTOCOL_ETHERNET: u32 = 1;
pub const HEADER_PROTOCOL_IPV4: u32 = 11;
pub const HEADER_PROTOCOL_IPV6: u32 = 12;

const ETYPE_IPV4: u16 = 0x0800;
const ETYPE_IPV6: u16 = 0x86dd;
const ETYPE_VLAN: u16 = 0x8100;
const ETYPE_MPLS_UNICAST: u16 = 0x8847;
const ETYPE_MPLS_MULTICAST: u16 = 0x8848;

const IP_PROTO_ICMP: u8 = 1;
const IP_PROTO_IPIP: u8 = 4;
const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;
const IP_PROTO_IPV6: u8 = 41;
const IP_PROTO_GRE: u8 = 47;
const IP_PROTO_ICMPV6: u8 = 58;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Ethernet,
    Dot1Q,
    Mpls,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Gre,
    Icmp,
    Icmpv6,
}

impl LayerKind {
    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Ethernet => "Ethernet",
            LayerKind::Dot1Q => "Dot1Q",
            LayerKind::Mpls => "MPLS",
            LayerKind::Ipv4 => "IPv4",
            LayerKind::Ipv6 => "IPv6",
            LayerKind::Tcp => "TCP",
            LayerKind::Udp => "UDP",
            LayerKind::Gre => "GRE",
            LayerKind::Icmp => "ICMP",
            LayerKind::Icmpv6 => "ICMPv6",
        }
    }
}

/// One recognized layer: its kind and the byte window it occupies in the
/// sampled header. The extractor addresses operator bit windows through
/// these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layer {
    pub kind: LayerKind,
    pub offset: usize,
    pub size: usize,
}

/// Parse the sampled header, filling flow attributes from the outermost
/// occurrence of each layer and returning the full layer trace. Inner
/// (encapsulated) layers are walked only when `parse_encap` is set and
/// never overwrite attributes the outer layers produced.
pub fn parse_sampled_header(
    data: &[u8],
    protocol: u32,
    parse_encap: bool,
    flow: &mut Flow,
) -> Vec<Layer> {
    let mut walker = Walker {
        data,
        flow,
        parse_encap,
        layers: Vec::new(),
        depth: 0,
    };

    match protocol {
        HEADER_PROTOCOL_ETHERNET => walker.ethernet(0),
        HEADER_PROTOCOL_IPV4 => walker.ipv4(0),
        HEADER_PROTOCOL_IPV6 => walker.ipv6(0),
        _ => {}
    }

    walker.layers
}

struct Walker<'a, 'f> {
    data: &'a [u8],
    flow: &'f mut Flow,
    parse_encap: bool,
    layers: Vec<Layer>,
    /// 0 while walking the outer chain, incremented per encapsulation
    depth: u32,
}

impl Walker<'_, '_> {
    fn remaining(&self, offset: usize) -> usize {
        self.data.len().saturating_sub(offset)
    }

    /// Attribute writes apply only to the outer chain.
    fn put(&mut self, name: &str, value: FieldValue) {
        if self.depth == 0 {
            self.flow.insert_if_absent(name, value);
        }
    }

    fn push_layer(&mut self, kind: LayerKind, offset: usize, size: usize) {
        self.layers.push(Layer { kind, offset, size });
    }

    fn ethernet(&mut self, offset: usize) {
        if self.remaining(offset) < 14 {
            return;
        }
        let mut dst = [0u8; 6];
        dst.copy_from_slice(&self.data[offset..offset + 6]);
        let mut src = [0u8; 6];
        src.copy_from_slice(&self.data[offset + 6..offset + 12]);
        self.put(name::DST_MAC, FieldValue::mac(dst));
        self.put(name::SRC_MAC, FieldValue::mac(src));
        self.push_layer(LayerKind::Ethernet, offset, 14);

        let etype = u16::from_be_bytes([self.data[offset + 12], self.data[offset + 13]]);
        self.ethertype(etype, offset + 14);
    }

    fn ethertype(&mut self, first: u16, start: usize) {
        let mut etype = first;
        let mut offset = start;

        while etype == ETYPE_VLAN {
            if self.remaining(offset) < 4 {
                return;
            }
            let vlan =
                u16::from_be_bytes([self.data[offset], self.data[offset + 1]]) & 0x0fff;
            self.put(name::VLAN_ID, FieldValue::Unsigned(u64::from(vlan)));
            self.push_layer(LayerKind::Dot1Q, offset, 4);
            etype = u16::from_be_bytes([self.data[offset + 2], self.data[offset + 3]]);
            offset += 4;
        }

        if etype == ETYPE_MPLS_UNICAST || etype == ETYPE_MPLS_MULTICAST {
            let Some((inner, next)) = self.mpls(offset) else {
                return;
            };
            etype = inner;
            offset = next;
        }

        self.put(name::ETYPE, FieldValue::Unsigned(u64::from(etype)));
        match etype {
            ETYPE_IPV4 => self.ipv4(offset),
            ETYPE_IPV6 => self.ipv6(offset),
            _ => {}
        }
    }

    /// Walk the label stack, stopping after the bottom-of-stack entry,
    /// then choose IPv4 or IPv6 from the first nibble that follows.
    fn mpls(&mut self, start: usize) -> Option<(u16, usize)> {
        let mut offset = start;
        let mut labels = Vec::new();
        let mut exps = Vec::new();
        let mut boses = Vec::new();
        let mut ttls = Vec::new();

        loop {
            if self.remaining(offset) < 4 {
                return None;
            }
            let entry = &self.data[offset..offset + 4];
            let label = (u32::from(entry[0]) << 16 | u32::from(entry[1]) << 8 | u32::from(entry[2]))
                >> 4;
            let bos = entry[2] & 0x01;
            labels.push(u64::from(label));
            exps.push(u64::from((entry[2] >> 1) & 0x07));
            boses.push(u64::from(bos));
            ttls.push(u64::from(entry[3]));
            offset += 4;
            if bos == 1 {
                break;
            }
        }

        self.put(name::MPLS_LABEL, FieldValue::UnsignedList(labels));
        self.put(name::MPLS_EXP, FieldValue::UnsignedList(exps));
        self.put(name::MPLS_BOS, FieldValue::UnsignedList(boses));
        self.put(name::MPLS_TTL, FieldValue::UnsignedList(ttls));
        self.push_layer(LayerKind::Mpls, start, offset - start);

        if self.remaining(offset) < 1 {
            return None;
        }
        match self.data[offset] >> 4 {
            4 => Some((ETYPE_IPV4, offset)),
            6 => Some((ETYPE_IPV6, offset)),
            _ => None,
        }
    }

    fn ipv4(&mut self, offset: usize) {
        if self.remaining(offset) < 20 {
            return;
        }
        let ihl = usize::from(self.data[offset] & 0x0f) * 4;
        if ihl < 20 || self.remaining(offset) < ihl {
            return;
        }

        let proto = self.data[offset + 9];
        let fragment_id =
            u16::from_be_bytes([self.data[offset + 4], self.data[offset + 5]]);
        let fragment_offset =
            u16::from_be_bytes([self.data[offset + 6], self.data[offset + 7]]) & 0x1fff;

        self.put(name::ETYPE, FieldValue::Unsigned(u64::from(ETYPE_IPV4)));
        self.put(
            name::SRC_ADDR,
            FieldValue::Bytes(self.data[offset + 12..offset + 16].to_vec()),
        );
        self.put(
            name::DST_ADDR,
            FieldValue::Bytes(self.data[offset + 16..offset + 20].to_vec()),
        );
        self.put(name::PROTO, FieldValue::Unsigned(u64::from(proto)));
        self.put(name::IP_TOS, FieldValue::Unsigned(u64::from(self.data[offset + 1])));
        self.put(name::IP_TTL, FieldValue::Unsigned(u64::from(self.data[offset + 8])));
        self.put(name::FRAGMENT_ID, FieldValue::Unsigned(u64::from(fragment_id)));
        self.put(
            name::FRAGMENT_OFFSET,
            FieldValue::Unsigned(u64::from(fragment_offset)),
        );
        self.push_layer(LayerKind::Ipv4, offset, ihl);

        // A non-first fragment has no transport header to read.
        if fragment_offset == 0 {
            self.transport(proto, offset + ihl);
        }
    }

    fn ipv6(&mut self, offset: usize) {
        if self.remaining(offset) < 40 {
            return;
        }

        let traffic_class =
            (u16::from_be_bytes([self.data[offset], self.data[offset + 1]]) & 0x0ff0) >> 4;
        let flow_label = u32::from_be_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]) & 0x000f_ffff;

        self.put(name::ETYPE, FieldValue::Unsigned(u64::from(ETYPE_IPV6)));
        self.put(
            name::SRC_ADDR,
            FieldValue::Bytes(self.data[offset + 8..offset + 24].to_vec()),
        );
        self.put(
            name::DST_ADDR,
            FieldValue::Bytes(self.data[offset + 24..offset + 40].to_vec()),
        );
        self.put(name::IP_TOS, FieldValue::Unsigned(u64::from(traffic_class)));
        self.put(name::IP_TTL, FieldValue::Unsigned(u64::from(self.data[offset + 7])));
        self.put(
            name::IPV6_FLOW_LABEL,
            FieldValue::Unsigned(u64::from(flow_label)),
        );

        // Skip the known extension headers via their length byte. The
        // skipped bytes count toward this layer's size.
        let mut next_header = self.data[offset + 6];
        let mut end = offset + 40;
        while matches!(next_header, 0 | 43 | 44 | 60) {
            if self.remaining(end) < 8 {
                self.put(name::PROTO, FieldValue::Unsigned(u64::from(next_header)));
                self.push_layer(LayerKind::Ipv6, offset, end - offset);
                return;
            }
            let ext_len = 8 + usize::from(self.data[end + 1]) * 8;
            if self.remaining(end) < ext_len {
                self.put(name::PROTO, FieldValue::Unsigned(u64::from(next_header)));
                self.push_layer(LayerKind::Ipv6, offset, end - offset);
                return;
            }
            next_header = self.data[end];
            end += ext_len;
        }

        self.put(name::PROTO, FieldValue::Unsigned(u64::from(next_header)));
        self.push_layer(LayerKind::Ipv6, offset, end - offset);
        self.transport(next_header, end);
    }

    fn transport(&mut self, proto: u8, offset: usize) {
        match proto {
            IP_PROTO_TCP => {
                if self.remaining(offset) < 20 {
                    return;
                }
                self.put(
                    name::SRC_PORT,
                    FieldValue::Unsigned(u64::from(u16::from_be_bytes([
                        self.data[offset],
                        self.data[offset + 1],
                    ]))),
                );
                self.put(
                    name::DST_PORT,
                    FieldValue::Unsigned(u64::from(u16::from_be_bytes([
                        self.data[offset + 2],
                        self.data[offset + 3],
                    ]))),
                );
                self.put(
                    name::TCP_FLAGS,
                    FieldValue::Unsigned(u64::from(self.data[offset + 13])),
                );
                self.push_layer(LayerKind::Tcp, offset, 20);
            }
            IP_PROTO_UDP => {
                if self.remaining(offset) < 8 {
                    return;
                }
                self.put(
                    name::SRC_PORT,
                    FieldValue::Unsigned(u64::from(u16::from_be_bytes([
                        self.data[offset],
                        self.data[offset + 1],
                    ]))),
                );
                self.put(
                    name::DST_PORT,
                    FieldValue::Unsigned(u64::from(u16::from_be_bytes([
                        self.data[offset + 2],
                        self.data[offset + 3],
                    ]))),
                );
                self.push_layer(LayerKind::Udp, offset, 8);
            }
            IP_PROTO_ICMP | IP_PROTO_ICMPV6 => {
                if self.remaining(offset) < 4 {
                    return;
                }
                self.put(
                    name::ICMP_TYPE,
                    FieldValue::Unsigned(u64::from(self.data[offset])),
                );
                self.put(
                    name::ICMP_CODE,
                    FieldValue::Unsigned(u64::from(self.data[offset + 1])),
                );
                let kind = if proto == IP_PROTO_ICMP {
                    LayerKind::Icmp
                } else {
                    LayerKind::Icmpv6
                };
                self.push_layer(kind, offset, 4);
            }
            IP_PROTO_GRE => {
                if self.remaining(offset) < 4 {
                    return;
                }
                let flags = self.data[offset];
                let mut size = 4;
                if flags & 0x80 != 0 {
                    size += 4; // checksum + reserved
                }
                if flags & 0x20 != 0 {
                    size += 4; // key
                }
                if flags & 0x10 != 0 {
                    size += 4; // sequence number
                }
                if self.remaining(offset) < size {
                    return;
                }
                let inner_etype =
                    u16::from_be_bytes([self.data[offset + 2], self.data[offset + 3]]);
                self.push_layer(LayerKind::Gre, offset, size);

                if self.parse_encap {
                    self.depth += 1;
                    match inner_etype {
                        ETYPE_IPV4 => self.ipv4(offset + size),
                        ETYPE_IPV6 => self.ipv6(offset + size),
                        _ => {}
                    }
                }
            }
            IP_PROTO_IPIP => {
                if self.parse_encap {
                    self.depth += 1;
                    self.ipv4(offset);
                }
            }
            IP_PROTO_IPV6 => {
                if self.parse_encap {
                    self.depth += 1;
                    self.ipv6(offset);
                }
            }
            _ => {}
        }
    }
}
