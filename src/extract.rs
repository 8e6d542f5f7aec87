//! Operator-defined bit-window extraction over the parsed layer trace.
//!
//! Rules address a bit window inside a layer's observed bytes and lift
//! the covered value into a named flow attribute. A window that falls
//! outside the layer contributes nothing; that is not an error.

use anyhow::{Result, bail};

use crate::config::{MappingEntry, SchemaDocument, SyntheticKind};
use crate::flow::{FieldValue, Flow};
use crate::packet::{Layer, LayerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleLayer {
    Ethernet,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    /// The whole sampled header from offset 0
    Custom,
}

impl RuleLayer {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "ethernet" => Some(RuleLayer::Ethernet),
            "ipv4" => Some(RuleLayer::Ipv4),
            "ipv6" => Some(RuleLayer::Ipv6),
            "tcp" => Some(RuleLayer::Tcp),
            "udp" => Some(RuleLayer::Udp),
            "custom" => Some(RuleLayer::Custom),
            _ => None,
        }
    }

    fn matches(self, kind: LayerKind) -> bool {
        matches!(
            (self, kind),
            (RuleLayer::Ethernet, LayerKind::Ethernet)
                | (RuleLayer::Ipv4, LayerKind::Ipv4)
                | (RuleLayer::Ipv6, LayerKind::Ipv6)
                | (RuleLayer::Tcp, LayerKind::Tcp)
                | (RuleLayer::Udp, LayerKind::Udp)
        )
    }
}

/// A compiled extraction rule. The destination shape comes from the
/// schema's synthetic field declaration; undeclared destinations behave
/// like scalar varints.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    pub layer: RuleLayer,
    pub encap: bool,
    pub bit_offset: u32,
    pub bit_length: u32,
    pub destination: String,
    pub kind: SyntheticKind,
    pub array: bool,
}

/// Compile the schema's mapping entries, resolving each destination
/// against the synthetic field declarations.
pub fn compile_rules(document: &SchemaDocument) -> Result<Vec<ExtractionRule>> {
    let mut rules = Vec::with_capacity(document.sflow.mapping.len());
    for entry in &document.sflow.mapping {
        rules.push(compile_rule(entry, document)?);
    }
    Ok(rules)
}

fn compile_rule(entry: &MappingEntry, document: &SchemaDocument) -> Result<ExtractionRule> {
    let Some(layer) = RuleLayer::parse(&entry.layer) else {
        bail!(
            "mapping rule for '{}' names unknown layer '{}'",
            entry.destination,
            entry.layer
        );
    };
    if entry.length > 64 && (entry.offset % 8 != 0 || entry.length % 8 != 0) {
        bail!(
            "mapping rule for '{}' is wider than 64 bits and must be byte-aligned",
            entry.destination
        );
    }

    let (kind, array) = match document.synthetic(&entry.destination) {
        Some(decl) => (decl.kind, decl.array),
        None => (SyntheticKind::Varint, false),
    };

    Ok(ExtractionRule {
        layer,
        encap: entry.encap,
        bit_offset: entry.offset,
        bit_length: entry.length,
        destination: entry.destination.clone(),
        kind,
        array,
    })
}

/// Apply every rule against the parsed layers of one sampled header.
pub fn apply_rules(rules: &[ExtractionRule], header: &[u8], layers: &[Layer], flow: &mut Flow) {
    for rule in rules {
        apply_rule(rule, header, layers, flow);
    }
}

fn apply_rule(rule: &ExtractionRule, header: &[u8], layers: &[Layer], flow: &mut Flow) {
    if rule.layer == RuleLayer::Custom {
        if !rule.encap {
            extract_into(rule, header, flow);
        }
        return;
    }

    let mut occurrence = 0usize;
    for layer in layers {
        if !rule.layer.matches(layer.kind) {
            continue;
        }
        occurrence += 1;
        // encap rules fire on the second and deeper occurrences only;
        // plain rules fire on the first.
        let fires = if rule.encap { occurrence >= 2 } else { occurrence == 1 };
        if !fires {
            continue;
        }

        let window = &header[layer.offset..layer.offset + layer.size];
        extract_into(rule, window, flow);

        if !rule.encap && !rule.array {
            break;
        }
    }
}

fn extract_into(rule: &ExtractionRule, window: &[u8], flow: &mut Flow) {
    let Some(value) = extract_bits(window, rule.bit_offset, rule.bit_length, rule.kind) else {
        return;
    };

    if rule.array {
        match value {
            FieldValue::Unsigned(v) => flow.append_unsigned(&rule.destination, v),
            FieldValue::Bytes(v) => flow.append_bytes(&rule.destination, v),
            _ => {}
        }
    } else {
        flow.insert(&rule.destination, value);
    }
}

/// Pull `length` bits starting at `offset` out of the window as a
/// big-endian value, shaped by the destination's declared type.
fn extract_bits(window: &[u8], offset: u32, length: u32, kind: SyntheticKind) -> Option<FieldValue> {
    let end = offset.checked_add(length)?;
    if length == 0 || end as usize > window.len() * 8 {
        return None;
    }

    if length > 64 {
        // Validated byte-aligned at compile time.
        let from = (offset / 8) as usize;
        let to = (end / 8) as usize;
        return Some(FieldValue::Bytes(window[from..to].to_vec()));
    }

    // Up to 64 bits spanning at most 9 bytes: accumulate through u128.
    let first = (offset / 8) as usize;
    let last = ((end - 1) / 8) as usize;
    let mut acc: u128 = 0;
    for byte in &window[first..=last] {
        acc = (acc << 8) | u128::from(*byte);
    }
    let tail_bits = (last as u32 + 1) * 8 - end;
    let value = ((acc >> tail_bits) & ((1u128 << length) - 1)) as u64;

    match kind {
        SyntheticKind::Varint => Some(FieldValue::Unsigned(value)),
        SyntheticKind::Bytes | SyntheticKind::String => {
            let width = length.div_ceil(8) as usize;
            let bytes = value.to_be_bytes()[8 - width..].to_vec();
            Some(FieldValue::Bytes(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaDocument;
    use crate::decoder::testkit;
    use crate::flow::Flow;
    use crate::packet::{HEADER_PROTOCOL_ETHERNET, parse_sampled_header};

    fn schema(yaml: &str) -> SchemaDocument {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn extracts_inner_source_address_from_encapsulated_ipv4() {
        let document = schema(
            r#"
formatter:
  protobuf:
    - name: src_ip_encap
      index: 1000
      type: bytes
sflow:
  mapping:
    - layer: ipv4
      encap: true
      offset: 96
      length: 32
      destination: src_ip_encap
"#,
        );
        let rules = compile_rules(&document).unwrap();

        // GRE-encapsulated IPv4-in-IPv4, inner source 10.0.0.1.
        let mut header = Vec::new();
        header.extend_from_slice(&[2, 2, 2, 2, 2, 2]);
        header.extend_from_slice(&[4, 4, 4, 4, 4, 4]);
        header.extend_from_slice(&0x0800u16.to_be_bytes());
        header.push(0x45);
        header.push(0x00);
        header.extend_from_slice(&100u16.to_be_bytes());
        header.extend_from_slice(&[0, 1, 0, 0]);
        header.push(62);
        header.push(47);
        header.extend_from_slice(&[0, 0]);
        header.extend_from_slice(&[192, 0, 2, 1]);
        header.extend_from_slice(&[192, 0, 2, 2]);
        header.extend_from_slice(&[0x00, 0x00]);
        header.extend_from_slice(&0x0800u16.to_be_bytes());
        header.extend_from_slice(&testkit::ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 9], 22, 51000));

        let mut flow = Flow::new();
        let layers = parse_sampled_header(&header, HEADER_PROTOCOL_ETHERNET, true, &mut flow);
        apply_rules(&rules, &header, &layers, &mut flow);

        assert_eq!(
            flow.get("src_ip_encap"),
            Some(&FieldValue::Bytes(vec![10, 0, 0, 1]))
        );

        // The extracted bytes render like any other address field.
        let mut with_render = document;
        with_render.formatter.fields = Some(vec!["src_ip_encap".to_string()]);
        with_render
            .formatter
            .render
            .insert("src_ip_encap".to_string(), "ip".to_string());
        let formatter = crate::format::Formatter::new(
            crate::config::OutputFormat::Json,
            &with_render,
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(formatter.format(&flow)).unwrap(),
            "{\"src_ip_encap\":\"10.0.0.1\"}\n"
        );
    }

    #[test]
    fn out_of_window_rule_contributes_nothing() {
        let document = schema(
            r#"
sflow:
  mapping:
    - layer: tcp
      offset: 400
      length: 16
      destination: beyond
"#,
        );
        let rules = compile_rules(&document).unwrap();

        let header = testkit::eth_ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 2], 443, 50000);
        let mut flow = Flow::new();
        let layers = parse_sampled_header(&header, HEADER_PROTOCOL_ETHERNET, false, &mut flow);
        apply_rules(&rules, &header, &layers, &mut flow);

        assert_eq!(flow.get("beyond"), None);
    }

    #[test]
    fn varint_destination_gets_the_unsigned_value() {
        let document = schema(
            r#"
sflow:
  mapping:
    - layer: tcp
      offset: 0
      length: 16
      destination: sport_copy
"#,
        );
        let rules = compile_rules(&document).unwrap();

        let header = testkit::eth_ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 2], 443, 50000);
        let mut flow = Flow::new();
        let layers = parse_sampled_header(&header, HEADER_PROTOCOL_ETHERNET, false, &mut flow);
        apply_rules(&rules, &header, &layers, &mut flow);

        assert_eq!(flow.get("sport_copy"), Some(&FieldValue::Unsigned(443)));
    }

    #[test]
    fn unaligned_window_extracts_big_endian_bits() {
        // 4 bits starting at bit 4 of the IPv4 layer: the IHL nibble.
        let document = schema(
            r#"
sflow:
  mapping:
    - layer: ipv4
      offset: 4
      length: 4
      destination: ihl
"#,
        );
        let rules = compile_rules(&document).unwrap();

        let header = testkit::eth_ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 2], 443, 50000);
        let mut flow = Flow::new();
        let layers = parse_sampled_header(&header, HEADER_PROTOCOL_ETHERNET, false, &mut flow);
        apply_rules(&rules, &header, &layers, &mut flow);

        assert_eq!(flow.get("ihl"), Some(&FieldValue::Unsigned(5)));
    }

    #[test]
    fn array_destination_accumulates_per_occurrence() {
        let document = schema(
            r#"
formatter:
  protobuf:
    - name: ttls
      index: 1001
      type: varint
      array: true
sflow:
  mapping:
    - layer: ipv4
      encap: true
      offset: 64
      length: 8
      destination: ttls
"#,
        );
        let rules = compile_rules(&document).unwrap();

        // IPv4 in IPv4 (protocol 4): outer ttl 62, inner ttl 64.
        let mut header = Vec::new();
        header.extend_from_slice(&[2, 2, 2, 2, 2, 2]);
        header.extend_from_slice(&[4, 4, 4, 4, 4, 4]);
        header.extend_from_slice(&0x0800u16.to_be_bytes());
        header.push(0x45);
        header.push(0x00);
        header.extend_from_slice(&80u16.to_be_bytes());
        header.extend_from_slice(&[0, 1, 0, 0]);
        header.push(62);
        header.push(4); // ip-in-ip
        header.extend_from_slice(&[0, 0]);
        header.extend_from_slice(&[192, 0, 2, 1]);
        header.extend_from_slice(&[192, 0, 2, 2]);
        header.extend_from_slice(&testkit::ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 9], 22, 51000));

        let mut flow = Flow::new();
        let layers = parse_sampled_header(&header, HEADER_PROTOCOL_ETHERNET, true, &mut flow);
        apply_rules(&rules, &header, &layers, &mut flow);

        // Only the inner occurrence matches the encap rule.
        assert_eq!(flow.get("ttls"), Some(&FieldValue::UnsignedList(vec![64])));
    }

    #[test]
    fn duplicate_scalar_destinations_are_last_write_wins() {
        let document = schema(
            r#"
sflow:
  mapping:
    - layer: tcp
      offset: 0
      length: 16
      destination: port
    - layer: tcp
      offset: 16
      length: 16
      destination: port
"#,
        );
        let rules = compile_rules(&document).unwrap();

        let header = testkit::eth_ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 2], 443, 50000);
        let mut flow = Flow::new();
        let layers = parse_sampled_header(&header, HEADER_PROTOCOL_ETHERNET, false, &mut flow);
        apply_rules(&rules, &header, &layers, &mut flow);

        assert_eq!(flow.get("port"), Some(&FieldValue::Unsigned(50000)));
    }

    #[test]
    fn unknown_layer_name_fails_compilation() {
        let document = schema(
            r#"
sflow:
  mapping:
    - layer: sctp
      offset: 0
      length: 16
      destination: x
"#,
        );
        assert!(compile_rules(&document).is_err());
    }

    #[test]
    fn custom_layer_addresses_the_whole_header() {
        let document = schema(
            r#"
sflow:
  mapping:
    - layer: custom
      offset: 96
      length: 16
      destination: raw_etype
"#,
        );
        let rules = compile_rules(&document).unwrap();

        let header = testkit::eth_ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 2], 443, 50000);
        let mut flow = Flow::new();
        let layers = parse_sampled_header(&header, HEADER_PROTOCOL_ETHERNET, false, &mut flow);
        apply_rules(&rules, &header, &layers, &mut flow);

        assert_eq!(flow.get("raw_etype"), Some(&FieldValue::Unsigned(0x0800)));
    }
}
