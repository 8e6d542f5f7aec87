//! The normalized flow record: a flat attribute bag keyed by the names
//! that appear in serialized output.

use std::collections::BTreeMap;
use std::net::IpAddr;

/// Well-known attribute names. Synthetic fields declared in the schema
/// document live alongside these in the same bag.
pub mod name {
    pub const TYPE: &str = "type";
    pub const TIME_RECEIVED_NS: &str = "time_received_ns";
    pub const TIME_FLOW_START_NS: &str = "time_flow_start_ns";
    pub const TIME_FLOW_END_NS: &str = "time_flow_end_ns";
    pub const SEQUENCE_NUM: &str = "sequence_num";
    pub const SAMPLING_RATE: &str = "sampling_rate";
    pub const SAMPLER_ADDRESS: &str = "sampler_address";
    pub const BYTES: &str = "bytes";
    pub const PACKETS: &str = "packets";
    pub const SRC_ADDR: &str = "src_addr";
    pub const DST_ADDR: &str = "dst_addr";
    pub const ETYPE: &str = "etype";
    pub const PROTO: &str = "proto";
    pub const SRC_PORT: &str = "src_port";
    pub const DST_PORT: &str = "dst_port";
    pub const IN_IF: &str = "in_if";
    pub const OUT_IF: &str = "out_if";
    pub const SRC_MAC: &str = "src_mac";
    pub const DST_MAC: &str = "dst_mac";
    pub const VLAN_ID: &str = "vlan_id";
    pub const SRC_VLAN: &str = "src_vlan";
    pub const DST_VLAN: &str = "dst_vlan";
    pub const IP_TOS: &str = "ip_tos";
    pub const IP_TTL: &str = "ip_ttl";
    pub const IPV6_FLOW_LABEL: &str = "ipv6_flow_label";
    pub const TCP_FLAGS: &str = "tcp_flags";
    pub const ICMP_TYPE: &str = "icmp_type";
    pub const ICMP_CODE: &str = "icmp_code";
    pub const FRAGMENT_ID: &str = "fragment_id";
    pub const FRAGMENT_OFFSET: &str = "fragment_offset";
    pub const NEXT_HOP: &str = "next_hop";
    pub const SRC_NET: &str = "src_net";
    pub const DST_NET: &str = "dst_net";
    pub const BGP_NEXT_HOP: &str = "bgp_next_hop";
    pub const SRC_AS: &str = "src_as";
    pub const DST_AS: &str = "dst_as";
    pub const AS_PATH: &str = "as_path";
    pub const BGP_COMMUNITIES: &str = "bgp_communities";
    pub const MPLS_LABEL: &str = "mpls_label";
    pub const MPLS_EXP: &str = "mpls_exp";
    pub const MPLS_BOS: &str = "mpls_bos";
    pub const MPLS_TTL: &str = "mpls_ttl";
    pub const HEADER_DATA: &str = "header_data";
    pub const LAYER_STACK: &str = "layer_stack";
    pub const LAYER_SIZE: &str = "layer_size";
}

/// Value shapes an attribute can take. IP addresses are byte strings of
/// 4 or 16 octets; MAC addresses are the unsigned integer formed by a
/// big-endian read of the 6 octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Unsigned(u64),
    Bytes(Vec<u8>),
    Text(String),
    UnsignedList(Vec<u64>),
    TextList(Vec<String>),
    BytesList(Vec<Vec<u8>>),
}

impl FieldValue {
    pub fn addr(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => FieldValue::Bytes(v4.octets().to_vec()),
            IpAddr::V6(v6) => FieldValue::Bytes(v6.octets().to_vec()),
        }
    }

    pub fn mac(octets: [u8; 6]) -> Self {
        let mut wide = [0u8; 8];
        wide[2..].copy_from_slice(&octets);
        FieldValue::Unsigned(u64::from_be_bytes(wide))
    }
}

/// One produced flow record. Entities live only for the datagram that
/// produced them; the bag owns every value it holds.
#[derive(Debug, Clone, Default)]
pub struct Flow {
    fields: BTreeMap<String, FieldValue>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }

    /// Insert only when the attribute is not yet set. The producer's
    /// RAW-wins precedence and the parser's outer-layer precedence are
    /// both built on this.
    pub fn insert_if_absent(&mut self, name: &str, value: FieldValue) {
        if !self.fields.contains_key(name) {
            self.fields.insert(name.to_string(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Append to an unsigned array attribute, creating it on first use.
    pub fn append_unsigned(&mut self, name: &str, value: u64) {
        match self.fields.get_mut(name) {
            Some(FieldValue::UnsignedList(values)) => values.push(value),
            _ => {
                self.fields
                    .insert(name.to_string(), FieldValue::UnsignedList(vec![value]));
            }
        }
    }

    /// Append to a byte-string array attribute, creating it on first use.
    pub fn append_bytes(&mut self, name: &str, value: Vec<u8>) {
        match self.fields.get_mut(name) {
            Some(FieldValue::BytesList(values)) => values.push(value),
            _ => {
                self.fields
                    .insert(name.to_string(), FieldValue::BytesList(vec![value]));
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Broad shape of a standard field, driving its default renderer, its
/// schema empty and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    NumberList,
    Addr,
    Mac,
    EtherType,
    Protocol,
    Binary,
    Text,
    TextList,
}

/// Static accessor table for the standard schema. The index doubles as
/// the field number in binary output and must stay stable.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub index: u32,
}

pub const STANDARD_FIELDS: &[FieldSpec] = &[
    FieldSpec { name: name::TYPE, kind: FieldKind::Text, index: 1 },
    FieldSpec { name: name::TIME_RECEIVED_NS, kind: FieldKind::Number, index: 2 },
    FieldSpec { name: name::TIME_FLOW_START_NS, kind: FieldKind::Number, index: 3 },
    FieldSpec { name: name::TIME_FLOW_END_NS, kind: FieldKind::Number, index: 4 },
    FieldSpec { name: name::SEQUENCE_NUM, kind: FieldKind::Number, index: 5 },
    FieldSpec { name: name::SAMPLING_RATE, kind: FieldKind::Number, index: 6 },
    FieldSpec { name: name::SAMPLER_ADDRESS, kind: FieldKind::Addr, index: 7 },
    FieldSpec { name: name::BYTES, kind: FieldKind::Number, index: 8 },
    FieldSpec { name: name::PACKETS, kind: FieldKind::Number, index: 9 },
    FieldSpec { name: name::SRC_ADDR, kind: FieldKind::Addr, index: 10 },
    FieldSpec { name: name::DST_ADDR, kind: FieldKind::Addr, index: 11 },
    FieldSpec { name: name::ETYPE, kind: FieldKind::EtherType, index: 12 },
    FieldSpec { name: name::PROTO, kind: FieldKind::Protocol, index: 13 },
    FieldSpec { name: name::SRC_PORT, kind: FieldKind::Number, index: 14 },
    FieldSpec { name: name::DST_PORT, kind: FieldKind::Number, index: 15 },
    FieldSpec { name: name::IN_IF, kind: FieldKind::Number, index: 16 },
    FieldSpec { name: name::OUT_IF, kind: FieldKind::Number, index: 17 },
    FieldSpec { name: name::SRC_MAC, kind: FieldKind::Mac, index: 18 },
    FieldSpec { name: name::DST_MAC, kind: FieldKind::Mac, index: 19 },
    FieldSpec { name: name::VLAN_ID, kind: FieldKind::Number, index: 20 },
    FieldSpec { name: name::SRC_VLAN, kind: FieldKind::Number, index: 21 },
    FieldSpec { name: name::DST_VLAN, kind: FieldKind::Number, index: 22 },
    FieldSpec { name: name::IP_TOS, kind: FieldKind::Number, index: 23 },
    FieldSpec { name: name::IP_TTL, kind: FieldKind::Number, index: 24 },
    FieldSpec { name: name::IPV6_FLOW_LABEL, kind: FieldKind::Number, index: 25 },
    FieldSpec { name: name::TCP_FLAGS, kind: FieldKind::Number, index: 26 },
    FieldSpec { name: name::ICMP_TYPE, kind: FieldKind::Number, index: 27 },
    FieldSpec { name: name::ICMP_CODE, kind: FieldKind::Number, index: 28 },
    FieldSpec { name: name::FRAGMENT_ID, kind: FieldKind::Number, index: 29 },
    FieldSpec { name: name::FRAGMENT_OFFSET, kind: FieldKind::Number, index: 30 },
    FieldSpec { name: name::NEXT_HOP, kind: FieldKind::Addr, index: 31 },
    FieldSpec { name: name::SRC_NET, kind: FieldKind::Number, index: 32 },
    FieldSpec { name: name::DST_NET, kind: FieldKind::Number, index: 33 },
    FieldSpec { name: name::BGP_NEXT_HOP, kind: FieldKind::Addr, index: 34 },
    FieldSpec { name: name::SRC_AS, kind: FieldKind::Number, index: 35 },
    FieldSpec { name: name::DST_AS, kind: FieldKind::Number, index: 36 },
    FieldSpec { name: name::AS_PATH, kind: FieldKind::NumberList, index: 37 },
    FieldSpec { name: name::BGP_COMMUNITIES, kind: FieldKind::NumberList, index: 38 },
    FieldSpec { name: name::MPLS_LABEL, kind: FieldKind::NumberList, index: 39 },
    FieldSpec { name: name::MPLS_EXP, kind: FieldKind::NumberList, index: 40 },
    FieldSpec { name: name::MPLS_BOS, kind: FieldKind::NumberList, index: 41 },
    FieldSpec { name: name::MPLS_TTL, kind: FieldKind::NumberList, index: 42 },
    FieldSpec { name: name::HEADER_DATA, kind: FieldKind::Binary, index: 43 },
    FieldSpec { name: name::LAYER_STACK, kind: FieldKind::TextList, index: 44 },
    FieldSpec { name: name::LAYER_SIZE, kind: FieldKind::NumberList, index: 45 },
];

pub fn standard_field(name: &str) -> Option<&'static FieldSpec> {
    STANDARD_FIELDS.iter().find(|spec| spec.name == name)
}

/// Projection used when the schema document lists no fields.
pub const DEFAULT_FIELDS: &[&str] = &[
    name::TYPE,
    name::TIME_RECEIVED_NS,
    name::SEQUENCE_NUM,
    name::SAMPLING_RATE,
    name::SAMPLER_ADDRESS,
    name::TIME_FLOW_START_NS,
    name::TIME_FLOW_END_NS,
    name::BYTES,
    name::PACKETS,
    name::SRC_ADDR,
    name::DST_ADDR,
    name::ETYPE,
    name::PROTO,
    name::SRC_PORT,
    name::DST_PORT,
    name::IN_IF,
    name::OUT_IF,
    name::SRC_MAC,
    name::DST_MAC,
    name::SRC_VLAN,
    name::DST_VLAN,
    name::IP_TOS,
    name::IP_TTL,
    name::IPV6_FLOW_LABEL,
    name::TCP_FLAGS,
    name::NEXT_HOP,
    name::SRC_AS,
    name::DST_AS,
    name::AS_PATH,
];
