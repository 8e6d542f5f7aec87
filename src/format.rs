//! Projection and rendering of produced flows.
//!
//! Text output is a hand-rolled JSON line per flow: field order follows
//! the projection list, scalars render through the per-field renderer,
//! listed-but-unpopulated fields emit their schema empty. Binary output
//! ignores the projection and emits every populated field in the
//! protobuf wire format behind a varint length prefix.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{LocalResult, SecondsFormat, TimeZone, Utc};

use crate::config::{OutputFormat, SchemaDocument, SyntheticKind};
use crate::flow::{DEFAULT_FIELDS, FieldKind, FieldValue, Flow, standard_field};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererId {
    Ip,
    Mac,
    Etype,
    Proto,
    Datetime,
    DatetimeNano,
    Base64,
    String,
    None,
}

impl RendererId {
    fn parse(id: &str) -> Option<Self> {
        match id {
            "ip" => Some(RendererId::Ip),
            "mac" => Some(RendererId::Mac),
            "etype" => Some(RendererId::Etype),
            "proto" => Some(RendererId::Proto),
            "datetime" => Some(RendererId::Datetime),
            "datetimenano" => Some(RendererId::DatetimeNano),
            "base64" => Some(RendererId::Base64),
            "string" => Some(RendererId::String),
            "none" => Some(RendererId::None),
            _ => None,
        }
    }
}

/// What a listed-but-unpopulated field emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmptyShape {
    Zero,
    Text,
    Array,
}

#[derive(Debug, Clone)]
struct ProjectedField {
    name: String,
    renderer: RendererId,
    empty: EmptyShape,
}

/// Immutable after construction; shared by all workers without locking.
pub struct Formatter {
    format: OutputFormat,
    projection: Vec<ProjectedField>,
    synthetic_index: BTreeMap<String, u32>,
    render_fallbacks: AtomicU64,
}

impl Formatter {
    pub fn new(format: OutputFormat, document: &SchemaDocument) -> Result<Self> {
        let names: Vec<String> = match &document.formatter.fields {
            Some(fields) => fields.clone(),
            None => DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
        };

        let mut projection = Vec::with_capacity(names.len());
        for field in names {
            let renderer = match document.formatter.render.get(&field) {
                Some(id) => match RendererId::parse(id) {
                    Some(renderer) => renderer,
                    None => bail!("unknown renderer '{}' for field '{}'", id, field),
                },
                None => default_renderer(&field, document),
            };
            let empty = empty_shape(&field, document);
            projection.push(ProjectedField {
                name: field,
                renderer,
                empty,
            });
        }

        let synthetic_index = document
            .formatter
            .protobuf
            .iter()
            .map(|decl| (decl.name.clone(), decl.index))
            .collect();

        Ok(Self {
            format,
            projection,
            synthetic_index,
            render_fallbacks: AtomicU64::new(0),
        })
    }

    /// Serialize one flow into its framed output bytes.
    pub fn format(&self, flow: &Flow) -> Vec<u8> {
        match self.format {
            OutputFormat::Json => self.json_line(flow),
            OutputFormat::Binary => self.binary_frame(flow),
        }
    }

    /// Renderer-to-value mismatches seen so far.
    pub fn render_fallbacks(&self) -> u64 {
        self.render_fallbacks.load(Ordering::Relaxed)
    }

    fn json_line(&self, flow: &Flow) -> Vec<u8> {
        let mut out = String::with_capacity(256);
        out.push('{');
        for (i, field) in self.projection.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push('"');
            json_escape_into(&mut out, &field.name);
            out.push_str("\":");
            match flow.get(&field.name) {
                Some(value) => self.write_json_value(&mut out, value, field.renderer),
                None => match field.empty {
                    EmptyShape::Zero => out.push('0'),
                    EmptyShape::Text => out.push_str("\"\""),
                    EmptyShape::Array => out.push_str("[]"),
                },
            }
        }
        out.push('}');
        out.push('\n');
        out.into_bytes()
    }

    fn write_json_value(&self, out: &mut String, value: &FieldValue, renderer: RendererId) {
        match value {
            FieldValue::Unsigned(v) => self.write_scalar(out, View::Unsigned(*v), renderer),
            FieldValue::Bytes(b) => self.write_scalar(out, View::Bytes(b), renderer),
            FieldValue::Text(t) => self.write_scalar(out, View::Text(t), renderer),
            FieldValue::UnsignedList(list) => {
                out.push('[');
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write_scalar(out, View::Unsigned(*v), renderer);
                }
                out.push(']');
            }
            FieldValue::TextList(list) => {
                out.push('[');
                for (i, t) in list.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write_scalar(out, View::Text(t), renderer);
                }
                out.push(']');
            }
            FieldValue::BytesList(list) => {
                out.push('[');
                for (i, b) in list.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write_scalar(out, View::Bytes(b), renderer);
                }
                out.push(']');
            }
        }
    }

    fn write_scalar(&self, out: &mut String, view: View<'_>, renderer: RendererId) {
        match self.render_view(view, renderer) {
            Rendered::Number(text) => out.push_str(&text),
            Rendered::Quoted(text) => {
                out.push('"');
                json_escape_into(out, &text);
                out.push('"');
            }
        }
    }

    fn render_view(&self, view: View<'_>, renderer: RendererId) -> Rendered {
        match renderer {
            RendererId::Ip => match view {
                View::Bytes(b) if b.is_empty() => Rendered::Quoted(String::new()),
                View::Bytes(b) if b.len() == 4 => {
                    let mut octets = [0u8; 4];
                    octets.copy_from_slice(b);
                    Rendered::Quoted(Ipv4Addr::from(octets).to_string())
                }
                View::Bytes(b) if b.len() == 16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(b);
                    Rendered::Quoted(Ipv6Addr::from(octets).to_string())
                }
                // Rendering an already-textual address is the identity.
                View::Text(t) => Rendered::Quoted(t.to_string()),
                other => self.fallback(other),
            },
            RendererId::Mac => match view {
                View::Unsigned(v) => Rendered::Quoted(mac_text(v)),
                View::Bytes(b) if b.len() == 6 => {
                    let mut wide = [0u8; 8];
                    wide[2..].copy_from_slice(b);
                    Rendered::Quoted(mac_text(u64::from_be_bytes(wide)))
                }
                View::Text(t) => Rendered::Quoted(t.to_string()),
                other => self.fallback(other),
            },
            RendererId::Etype => match view {
                View::Unsigned(v) => Rendered::Quoted(match etype_mnemonic(v) {
                    Some(mnemonic) => mnemonic.to_string(),
                    None => format!("0x{v:04X}"),
                }),
                View::Text(t) => Rendered::Quoted(t.to_string()),
                other => self.fallback(other),
            },
            RendererId::Proto => match view {
                View::Unsigned(v) => Rendered::Quoted(match proto_mnemonic(v) {
                    Some(mnemonic) => mnemonic.to_string(),
                    None => v.to_string(),
                }),
                View::Text(t) => Rendered::Quoted(t.to_string()),
                other => self.fallback(other),
            },
            RendererId::Datetime => match view {
                View::Unsigned(ns) => Rendered::Quoted(rfc3339(ns, SecondsFormat::Secs)),
                other => self.fallback(other),
            },
            RendererId::DatetimeNano => match view {
                View::Unsigned(ns) => Rendered::Quoted(rfc3339(ns, SecondsFormat::Nanos)),
                other => self.fallback(other),
            },
            RendererId::Base64 => match view {
                View::Bytes(b) => Rendered::Quoted(BASE64.encode(b)),
                View::Text(t) => Rendered::Quoted(BASE64.encode(t.as_bytes())),
                other => self.fallback(other),
            },
            RendererId::String => match view {
                View::Bytes(b) => Rendered::Quoted(printable_text(b)),
                View::Text(t) => Rendered::Quoted(t.to_string()),
                other => self.fallback(other),
            },
            RendererId::None => default_form(view),
        }
    }

    /// Renderer applied to a shape it cannot handle: count it and emit
    /// the value's default textual form.
    fn fallback(&self, view: View<'_>) -> Rendered {
        self.render_fallbacks.fetch_add(1, Ordering::Relaxed);
        default_form(view)
    }

    fn binary_frame(&self, flow: &Flow) -> Vec<u8> {
        let mut body = Vec::with_capacity(128);
        for (field, value) in flow.iter() {
            let Some(index) = self.field_index(field) else {
                continue;
            };
            match value {
                FieldValue::Unsigned(v) => put_varint_field(&mut body, index, *v),
                FieldValue::UnsignedList(list) => {
                    for v in list {
                        put_varint_field(&mut body, index, *v);
                    }
                }
                FieldValue::Bytes(b) => put_bytes_field(&mut body, index, b),
                FieldValue::Text(t) => put_bytes_field(&mut body, index, t.as_bytes()),
                FieldValue::TextList(list) => {
                    for t in list {
                        put_bytes_field(&mut body, index, t.as_bytes());
                    }
                }
                FieldValue::BytesList(list) => {
                    for b in list {
                        put_bytes_field(&mut body, index, b);
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(body.len() + 4);
        put_varint(&mut out, body.len() as u64);
        out.extend_from_slice(&body);
        out
    }

    fn field_index(&self, field: &str) -> Option<u32> {
        standard_field(field)
            .map(|spec| spec.index)
            .or_else(|| self.synthetic_index.get(field).copied())
    }
}

#[derive(Debug, Clone, Copy)]
enum View<'a> {
    Unsigned(u64),
    Bytes(&'a [u8]),
    Text(&'a str),
}

enum Rendered {
    Number(String),
    Quoted(String),
}

fn default_form(view: View<'_>) -> Rendered {
    match view {
        View::Unsigned(v) => Rendered::Number(v.to_string()),
        View::Text(t) => Rendered::Quoted(t.to_string()),
        View::Bytes(b) => Rendered::Quoted(BASE64.encode(b)),
    }
}

fn default_renderer(field: &str, document: &SchemaDocument) -> RendererId {
    if let Some(spec) = standard_field(field) {
        return match spec.kind {
            FieldKind::Addr => RendererId::Ip,
            FieldKind::Mac => RendererId::Mac,
            FieldKind::EtherType => RendererId::Etype,
            FieldKind::Protocol => RendererId::Proto,
            FieldKind::Binary => RendererId::Base64,
            FieldKind::Number
            | FieldKind::NumberList
            | FieldKind::Text
            | FieldKind::TextList => RendererId::None,
        };
    }
    match document.synthetic(field).map(|decl| decl.kind) {
        Some(SyntheticKind::Bytes) => RendererId::Base64,
        Some(SyntheticKind::String) => RendererId::String,
        _ => RendererId::None,
    }
}

fn empty_shape(field: &str, document: &SchemaDocument) -> EmptyShape {
    if let Some(spec) = standard_field(field) {
        return match spec.kind {
            FieldKind::Number => EmptyShape::Zero,
            FieldKind::NumberList | FieldKind::TextList => EmptyShape::Array,
            _ => EmptyShape::Text,
        };
    }
    match document.synthetic(field) {
        Some(decl) if decl.array => EmptyShape::Array,
        Some(decl) if decl.kind == SyntheticKind::Varint => EmptyShape::Zero,
        Some(_) => EmptyShape::Text,
        None => EmptyShape::Text,
    }
}

fn mac_text(value: u64) -> String {
    let b = value.to_be_bytes();
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        b[2], b[3], b[4], b[5], b[6], b[7]
    )
}

fn etype_mnemonic(value: u64) -> Option<&'static str> {
    match value {
        0x0800 => Some("IPv4"),
        0x0806 => Some("ARP"),
        0x8035 => Some("RARP"),
        0x8100 => Some("Dot1Q"),
        0x86dd => Some("IPv6"),
        0x8847 => Some("MPLS"),
        0x8848 => Some("MPLS-Multicast"),
        0x88a8 => Some("QinQ"),
        0x88cc => Some("LLDP"),
        _ => None,
    }
}

fn proto_mnemonic(value: u64) -> Option<&'static str> {
    match value {
        1 => Some("ICMP"),
        2 => Some("IGMP"),
        4 => Some("IPIP"),
        6 => Some("TCP"),
        17 => Some("UDP"),
        41 => Some("IPv6"),
        47 => Some("GRE"),
        50 => Some("ESP"),
        51 => Some("AH"),
        58 => Some("ICMPv6"),
        89 => Some("OSPF"),
        112 => Some("VRRP"),
        132 => Some("SCTP"),
        _ => None,
    }
}

fn rfc3339(ns: u64, precision: SecondsFormat) -> String {
    let secs = (ns / 1_000_000_000) as i64;
    let sub = (ns % 1_000_000_000) as u32;
    match Utc.timestamp_opt(secs, sub) {
        LocalResult::Single(dt) => dt.to_rfc3339_opts(precision, true),
        _ => ns.to_string(),
    }
}

/// UTF-8 text with control and invalid bytes replaced.
fn printable_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .map(|c| if c.is_control() || c == '\u{fffd}' { '.' } else { c })
        .collect()
}

fn json_escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
}

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

fn put_varint_field(buf: &mut Vec<u8>, index: u32, value: u64) {
    put_varint(buf, u64::from(index) << 3); // wire type 0
    put_varint(buf, value);
}

fn put_bytes_field(buf: &mut Vec<u8>, index: u32, data: &[u8]) {
    put_varint(buf, (u64::from(index) << 3) | 2);
    put_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaDocument;
    use crate::flow::name;

    fn formatter(yaml: &str) -> Formatter {
        let document: SchemaDocument = serde_yaml::from_str(yaml).unwrap();
        Formatter::new(OutputFormat::Json, &document).unwrap()
    }

    fn json(formatter: &Formatter, flow: &Flow) -> String {
        String::from_utf8(formatter.format(flow)).unwrap()
    }

    #[test]
    fn projection_controls_field_order_and_content() {
        let formatter = formatter(
            r#"
formatter:
  fields: [type, src_addr, dst_addr]
  render:
    src_addr: ip
    dst_addr: ip
"#,
        );

        let mut flow = Flow::new();
        flow.insert(name::TYPE, FieldValue::Text("SFLOW_5".into()));
        flow.insert(
            name::SRC_ADDR,
            FieldValue::Bytes(vec![
                0xca, 0xba, 0x00, 0x26, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4,
            ]),
        );
        flow.insert(
            name::DST_ADDR,
            FieldValue::Bytes(vec![
                0xca, 0xba, 0x00, 0x20, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4,
            ]),
        );
        flow.insert(name::SRC_PORT, FieldValue::Unsigned(30044));

        assert_eq!(
            json(&formatter, &flow),
            "{\"type\":\"SFLOW_5\",\"src_addr\":\"caba:26::4\",\"dst_addr\":\"caba:20::4\"}\n"
        );
    }

    #[test]
    fn removing_a_field_removes_exactly_that_key() {
        let full = formatter("formatter:\n  fields: [type, bytes, proto]\n");
        let narrowed = formatter("formatter:\n  fields: [type, proto]\n");

        let mut flow = Flow::new();
        flow.insert(name::TYPE, FieldValue::Text("SFLOW_5".into()));
        flow.insert(name::BYTES, FieldValue::Unsigned(1500));
        flow.insert(name::PROTO, FieldValue::Unsigned(6));

        assert_eq!(
            json(&full, &flow),
            "{\"type\":\"SFLOW_5\",\"bytes\":1500,\"proto\":\"TCP\"}\n"
        );
        assert_eq!(json(&narrowed, &flow), "{\"type\":\"SFLOW_5\",\"proto\":\"TCP\"}\n");
    }

    #[test]
    fn unpopulated_fields_emit_schema_empties() {
        let formatter = formatter("formatter:\n  fields: [bytes, src_addr, as_path]\n");
        let flow = Flow::new();
        assert_eq!(
            json(&formatter, &flow),
            "{\"bytes\":0,\"src_addr\":\"\",\"as_path\":[]}\n"
        );
    }

    #[test]
    fn default_renderers_follow_the_accessor_table() {
        let formatter = formatter("formatter:\n  fields: [src_addr, src_mac, etype, proto]\n");

        let mut flow = Flow::new();
        flow.insert(name::SRC_ADDR, FieldValue::Bytes(vec![10, 0, 0, 1]));
        flow.insert(name::SRC_MAC, FieldValue::mac([0x24, 0x6e, 0x96, 0x90, 0x7a, 0x50]));
        flow.insert(name::ETYPE, FieldValue::Unsigned(0x86dd));
        flow.insert(name::PROTO, FieldValue::Unsigned(17));

        assert_eq!(
            json(&formatter, &flow),
            "{\"src_addr\":\"10.0.0.1\",\"src_mac\":\"24:6e:96:90:7a:50\",\"etype\":\"IPv6\",\"proto\":\"UDP\"}\n"
        );
    }

    #[test]
    fn unknown_etype_and_proto_fall_back_to_numbers() {
        let formatter = formatter("formatter:\n  fields: [etype, proto]\n");
        let mut flow = Flow::new();
        flow.insert(name::ETYPE, FieldValue::Unsigned(0x22f3));
        flow.insert(name::PROTO, FieldValue::Unsigned(253));
        assert_eq!(json(&formatter, &flow), "{\"etype\":\"0x22F3\",\"proto\":\"253\"}\n");
    }

    #[test]
    fn ip_and_mac_renderers_are_idempotent_on_text() {
        let formatter = formatter(
            "formatter:\n  fields: [src_addr, src_mac]\n  render:\n    src_addr: ip\n    src_mac: mac\n",
        );
        let mut flow = Flow::new();
        flow.insert(name::SRC_ADDR, FieldValue::Text("10.0.0.1".into()));
        flow.insert(name::SRC_MAC, FieldValue::Text("24:6e:96:90:7a:50".into()));
        assert_eq!(
            json(&formatter, &flow),
            "{\"src_addr\":\"10.0.0.1\",\"src_mac\":\"24:6e:96:90:7a:50\"}\n"
        );
        assert_eq!(formatter.render_fallbacks(), 0);
    }

    #[test]
    fn mismatched_renderer_counts_a_fallback_and_keeps_the_default_form() {
        let formatter = formatter(
            "formatter:\n  fields: [bytes]\n  render:\n    bytes: ip\n",
        );
        let mut flow = Flow::new();
        flow.insert(name::BYTES, FieldValue::Unsigned(1500));
        assert_eq!(json(&formatter, &flow), "{\"bytes\":1500}\n");
        assert_eq!(formatter.render_fallbacks(), 1);
    }

    #[test]
    fn datetime_renderers_emit_rfc3339_utc() {
        let formatter = formatter(
            "formatter:\n  fields: [time_received_ns, time_flow_end_ns]\n  render:\n    time_received_ns: datetime\n    time_flow_end_ns: datetimenano\n",
        );
        let mut flow = Flow::new();
        flow.insert(
            name::TIME_RECEIVED_NS,
            FieldValue::Unsigned(1_700_000_000_000_000_000),
        );
        flow.insert(
            name::TIME_FLOW_END_NS,
            FieldValue::Unsigned(1_700_000_000_123_456_789),
        );
        assert_eq!(
            json(&formatter, &flow),
            "{\"time_received_ns\":\"2023-11-14T22:13:20Z\",\"time_flow_end_ns\":\"2023-11-14T22:13:20.123456789Z\"}\n"
        );
    }

    #[test]
    fn json_strings_are_escaped() {
        let formatter = formatter(
            "formatter:\n  fields: [note]\n  protobuf:\n    - name: note\n      index: 1000\n      type: string\n",
        );
        let mut flow = Flow::new();
        flow.insert("note", FieldValue::Text("a\"b\\c\nd".into()));
        assert_eq!(json(&formatter, &flow), "{\"note\":\"a\\\"b\\\\c\\nd\"}\n");
    }

    #[test]
    fn unsigned_lists_render_as_json_number_arrays() {
        let formatter = formatter("formatter:\n  fields: [mpls_label, layer_stack]\n");
        let mut flow = Flow::new();
        flow.insert(
            name::MPLS_LABEL,
            FieldValue::UnsignedList(vec![63400, 61400, 2]),
        );
        flow.insert(
            name::LAYER_STACK,
            FieldValue::TextList(vec!["Ethernet".into(), "MPLS".into()]),
        );
        assert_eq!(
            json(&formatter, &flow),
            "{\"mpls_label\":[63400,61400,2],\"layer_stack\":[\"Ethernet\",\"MPLS\"]}\n"
        );
    }

    #[test]
    fn base64_renderer_pads_standard_output() {
        let formatter = formatter("formatter:\n  fields: [header_data]\n");
        let mut flow = Flow::new();
        flow.insert(name::HEADER_DATA, FieldValue::Bytes(vec![0xde, 0xad, 0xbe]));
        assert_eq!(json(&formatter, &flow), "{\"header_data\":\"3q2+\"}\n");
    }

    fn read_varint(data: &[u8], pos: &mut usize) -> u64 {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            let byte = data[*pos];
            *pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        value
    }

    #[test]
    fn binary_output_emits_every_populated_field_with_stable_tags() {
        let document: SchemaDocument = serde_yaml::from_str(
            "formatter:\n  fields: [type]\n  protobuf:\n    - name: synth\n      index: 1000\n      type: varint\n",
        )
        .unwrap();
        let formatter = Formatter::new(OutputFormat::Binary, &document).unwrap();

        let mut flow = Flow::new();
        flow.insert(name::BYTES, FieldValue::Unsigned(1500));
        flow.insert(name::TYPE, FieldValue::Text("SFLOW_5".into()));
        flow.insert("synth", FieldValue::Unsigned(7));

        let frame = formatter.format(&flow);
        let mut pos = 0;
        let body_len = read_varint(&frame, &mut pos) as usize;
        assert_eq!(frame.len() - pos, body_len);

        let mut fields = std::collections::BTreeMap::new();
        while pos < frame.len() {
            let tag = read_varint(&frame, &mut pos);
            let index = tag >> 3;
            match tag & 0x7 {
                0 => {
                    let value = read_varint(&frame, &mut pos);
                    fields.insert(index, format!("{value}"));
                }
                2 => {
                    let len = read_varint(&frame, &mut pos) as usize;
                    let data = frame[pos..pos + len].to_vec();
                    pos += len;
                    fields.insert(index, String::from_utf8(data).unwrap());
                }
                other => panic!("unexpected wire type {other}"),
            }
        }

        // bytes is field 8, type is field 1 in the accessor table.
        assert_eq!(fields.get(&8).map(String::as_str), Some("1500"));
        assert_eq!(fields.get(&1).map(String::as_str), Some("SFLOW_5"));
        assert_eq!(fields.get(&1000).map(String::as_str), Some("7"));
    }

    #[test]
    fn unknown_renderer_id_is_a_construction_error() {
        let document: SchemaDocument = serde_yaml::from_str(
            "formatter:\n  fields: [bytes]\n  render:\n    bytes: hex\n",
        )
        .unwrap();
        assert!(Formatter::new(OutputFormat::Json, &document).is_err());
    }
}
