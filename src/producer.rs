//! Fans a decoded datagram into one flow record per flow sample,
//! merging sample metadata, per-record fields, layer-parsed attributes
//! and extracted fields.
//!
//! Merge precedence: later record writes overwrite earlier ones, except
//! that the RAW record's parsed header always wins over the extended
//! Ethernet/IP records. The bytes on the wire are ground truth when an
//! agent offers both.

use std::net::SocketAddr;

use crate::decoder::{self, Datagram, DecodeError, DecodeStatus, FlowRecord, FlowSample};
use crate::extract::{self, ExtractionRule};
use crate::flow::{FieldValue, Flow, name};
use crate::packet;

pub const FLOW_TYPE_SFLOW_5: &str = "SFLOW_5";

const ETYPE_IPV4: u64 = 0x0800;
const ETYPE_IPV6: u64 = 0x86dd;

/// Reception metadata for one UDP payload.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveContext {
    pub time_received_ns: u64,
    pub source: SocketAddr,
}

/// Decode one UDP payload and produce its flows. Pure over its inputs;
/// soft decode conditions ride along in the returned status.
pub fn process_datagram(
    payload: &[u8],
    ctx: &ReceiveContext,
    rules: &[ExtractionRule],
) -> Result<(Vec<Flow>, DecodeStatus), DecodeError> {
    let (datagram, status) = decoder::decode_datagram(payload)?;
    Ok((produce(&datagram, ctx, rules), status))
}

/// Produce one flow per flow sample in the datagram.
pub fn produce(datagram: &Datagram, ctx: &ReceiveContext, rules: &[ExtractionRule]) -> Vec<Flow> {
    let parse_encap = rules.iter().any(|rule| rule.encap);
    datagram
        .samples
        .iter()
        .map(|sample| produce_flow(datagram, sample, ctx, rules, parse_encap))
        .collect()
}

fn produce_flow(
    datagram: &Datagram,
    sample: &FlowSample,
    ctx: &ReceiveContext,
    rules: &[ExtractionRule],
    parse_encap: bool,
) -> Flow {
    let mut flow = Flow::new();

    flow.insert(name::TYPE, FieldValue::Text(FLOW_TYPE_SFLOW_5.to_string()));
    flow.insert(name::PACKETS, FieldValue::Unsigned(1));

    flow.insert(name::SAMPLER_ADDRESS, FieldValue::addr(datagram.agent_address));
    flow.insert(
        name::SEQUENCE_NUM,
        FieldValue::Unsigned(u64::from(datagram.sequence_number)),
    );
    flow.insert(
        name::TIME_RECEIVED_NS,
        FieldValue::Unsigned(ctx.time_received_ns),
    );
    flow.insert(
        name::TIME_FLOW_START_NS,
        FieldValue::Unsigned(ctx.time_received_ns),
    );
    flow.insert(
        name::TIME_FLOW_END_NS,
        FieldValue::Unsigned(ctx.time_received_ns),
    );

    flow.insert(
        name::SAMPLING_RATE,
        FieldValue::Unsigned(u64::from(sample.sampling_rate)),
    );
    flow.insert(name::IN_IF, FieldValue::Unsigned(u64::from(sample.input_if)));
    flow.insert(name::OUT_IF, FieldValue::Unsigned(u64::from(sample.output_if)));

    // RAW records first so the parsed wire bytes take precedence over
    // the extended Ethernet/IP records regardless of record order.
    for record in &sample.records {
        if let FlowRecord::SampledHeader(raw) = record {
            merge_raw(&mut flow, raw, rules, parse_encap);
        }
    }

    for record in &sample.records {
        match record {
            FlowRecord::SampledHeader(_) => {}
            FlowRecord::SampledEthernet(eth) => {
                flow.insert_if_absent(name::SRC_MAC, FieldValue::mac(eth.src_mac));
                flow.insert_if_absent(name::DST_MAC, FieldValue::mac(eth.dst_mac));
                flow.insert_if_absent(name::ETYPE, FieldValue::Unsigned(u64::from(eth.etype)));
                flow.insert_if_absent(name::BYTES, FieldValue::Unsigned(u64::from(eth.frame_length)));
            }
            FlowRecord::SampledIpv4(ip) => merge_sampled_ip(&mut flow, ip, ETYPE_IPV4),
            FlowRecord::SampledIpv6(ip) => merge_sampled_ip(&mut flow, ip, ETYPE_IPV6),
            FlowRecord::ExtendedSwitch(sw) => {
                flow.insert(name::SRC_VLAN, FieldValue::Unsigned(u64::from(sw.src_vlan)));
                flow.insert(name::DST_VLAN, FieldValue::Unsigned(u64::from(sw.dst_vlan)));
            }
            FlowRecord::ExtendedRouter(router) => {
                flow.insert(name::NEXT_HOP, FieldValue::addr(router.next_hop));
                flow.insert(
                    name::SRC_NET,
                    FieldValue::Unsigned(u64::from(router.src_mask_len)),
                );
                flow.insert(
                    name::DST_NET,
                    FieldValue::Unsigned(u64::from(router.dst_mask_len)),
                );
            }
            FlowRecord::ExtendedGateway(gateway) => merge_gateway(&mut flow, gateway),
        }
    }

    flow
}

fn merge_raw(
    flow: &mut Flow,
    raw: &decoder::SampledHeader,
    rules: &[ExtractionRule],
    parse_encap: bool,
) {
    flow.insert(name::BYTES, FieldValue::Unsigned(u64::from(raw.frame_length)));
    flow.insert(name::HEADER_DATA, FieldValue::Bytes(raw.header.clone()));

    let layers = packet::parse_sampled_header(&raw.header, raw.protocol, parse_encap, flow);
    if !layers.is_empty() {
        flow.insert(
            name::LAYER_STACK,
            FieldValue::TextList(layers.iter().map(|l| l.kind.name().to_string()).collect()),
        );
        flow.insert(
            name::LAYER_SIZE,
            FieldValue::UnsignedList(layers.iter().map(|l| l.size as u64).collect()),
        );
    }

    extract::apply_rules(rules, &raw.header, &layers, flow);
}

/// Extended IP records fill only what the RAW parse left unset.
fn merge_sampled_ip(flow: &mut Flow, ip: &decoder::SampledIp, etype: u64) {
    flow.insert_if_absent(name::ETYPE, FieldValue::Unsigned(etype));
    flow.insert_if_absent(name::SRC_ADDR, FieldValue::addr(ip.src_addr));
    flow.insert_if_absent(name::DST_ADDR, FieldValue::addr(ip.dst_addr));
    flow.insert_if_absent(name::PROTO, FieldValue::Unsigned(u64::from(ip.protocol)));
    flow.insert_if_absent(name::SRC_PORT, FieldValue::Unsigned(u64::from(ip.src_port)));
    flow.insert_if_absent(name::DST_PORT, FieldValue::Unsigned(u64::from(ip.dst_port)));
    flow.insert_if_absent(name::TCP_FLAGS, FieldValue::Unsigned(u64::from(ip.tcp_flags)));
    flow.insert_if_absent(name::IP_TOS, FieldValue::Unsigned(u64::from(ip.tos)));
    flow.insert_if_absent(name::BYTES, FieldValue::Unsigned(u64::from(ip.length)));
}

fn merge_gateway(flow: &mut Flow, gateway: &decoder::ExtendedGateway) {
    flow.insert(name::BGP_NEXT_HOP, FieldValue::addr(gateway.next_hop));
    flow.insert(name::SRC_AS, FieldValue::Unsigned(u64::from(gateway.src_as)));

    // Flatten segments to a single path in insertion order; SET
    // segments keep their received ordering.
    let path: Vec<u64> = gateway
        .segments
        .iter()
        .flat_map(|segment| segment.path.iter().map(|asn| u64::from(*asn)))
        .collect();
    let dst_as = path.last().copied().unwrap_or(0);
    flow.insert(name::DST_AS, FieldValue::Unsigned(dst_as));
    flow.insert(name::AS_PATH, FieldValue::UnsignedList(path));

    flow.insert(
        name::BGP_COMMUNITIES,
        FieldValue::UnsignedList(gateway.communities.iter().map(|c| u64::from(*c)).collect()),
    );
}
