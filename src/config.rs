//! Collector configuration: CLI flags and the operator schema document.
//!
//! The schema document is one YAML file controlling text projection
//! (`formatter.fields`, `formatter.render`), synthetic field declarations
//! (`formatter.protobuf`) and bit-level extraction rules
//! (`sflow.mapping`).

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

fn parse_duration(value: &str) -> Result<Duration, String> {
    match humantime::parse_duration(value) {
        Ok(duration) => Ok(duration),
        Err(err) => Err(format!(
            "'{value}' is not a duration such as '30s' or '2m': {err}"
        )),
    }
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "sflow-collector",
    about = "Collects sFlow v5 datagrams and emits normalized flow records"
)]
pub struct CollectorConfig {
    /// UDP listen address for sFlow datagrams
    #[arg(long = "listen", default_value = "0.0.0.0:6343")]
    pub listen: String,

    /// Number of worker tasks sharing the listen socket
    #[arg(long = "workers", default_value_t = 1)]
    pub workers: usize,

    /// Largest accepted UDP payload
    #[arg(long = "max-packet-size", default_value_t = 9216)]
    pub max_packet_size: usize,

    /// Output serialization
    #[arg(long = "format", value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Output destination
    #[arg(long = "output", value_enum, default_value = "stdout")]
    pub output: OutputKind,

    /// Destination path when --output=file
    #[arg(long = "output-path")]
    pub output_path: Option<PathBuf>,

    /// Path to the YAML schema document (projection, renderers,
    /// synthetic fields, extraction rules)
    #[arg(long = "schema")]
    pub schema: Option<PathBuf>,

    /// How often to log the metrics snapshot
    #[arg(
        long = "stats-interval",
        default_value = "60s",
        value_parser = parse_duration
    )]
    pub stats_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:6343".to_string(),
            workers: 1,
            max_packet_size: 9216,
            format: OutputFormat::Json,
            output: OutputKind::Stdout,
            output_path: None,
            schema: None,
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<()> {
        self.listen
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address '{}'", self.listen))?;
        if self.workers == 0 {
            bail!("--workers must be at least 1");
        }
        if self.max_packet_size < 512 {
            bail!("--max-packet-size must be at least 512");
        }
        if self.output == OutputKind::File && self.output_path.is_none() {
            bail!("--output=file requires --output-path");
        }
        Ok(())
    }

    /// Load the schema document, or the built-in defaults when no path
    /// was given.
    pub fn load_schema(&self) -> Result<SchemaDocument> {
        let Some(path) = &self.schema else {
            return Ok(SchemaDocument::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read schema document {}", path.display()))?;
        let document: SchemaDocument = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse schema document {}", path.display()))?;
        document.validate()?;
        Ok(document)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON object per line, shaped by the projection
    Json,
    /// Length-prefixed binary messages carrying every populated field
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum OutputKind {
    Stdout,
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchemaDocument {
    pub formatter: FormatterSection,
    pub sflow: SflowSection,
}

impl SchemaDocument {
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeMap::new();
        for decl in &self.formatter.protobuf {
            if let Some(previous) = seen.insert(decl.name.clone(), decl.index) {
                bail!(
                    "synthetic field '{}' declared twice (indexes {} and {})",
                    decl.name,
                    previous,
                    decl.index
                );
            }
        }
        for rule in &self.sflow.mapping {
            if rule.length == 0 {
                bail!(
                    "mapping rule for '{}' has a zero-length window",
                    rule.destination
                );
            }
        }
        Ok(())
    }

    /// A destination's declared shape, defaulting to a scalar varint for
    /// undeclared names.
    pub fn synthetic(&self, name: &str) -> Option<&SyntheticFieldDecl> {
        self.formatter
            .protobuf
            .iter()
            .find(|decl| decl.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FormatterSection {
    /// Output field names in order; `None` keeps the built-in default
    /// projection.
    pub fields: Option<Vec<String>>,
    /// Field name to renderer identifier
    pub render: BTreeMap<String, String>,
    /// Synthetic field declarations referenced by extraction rules
    pub protobuf: Vec<SyntheticFieldDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyntheticFieldDecl {
    pub name: String,
    pub index: u32,
    #[serde(rename = "type")]
    pub kind: SyntheticKind,
    #[serde(default)]
    pub array: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyntheticKind {
    String,
    Varint,
    Bytes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SflowSection {
    pub mapping: Vec<MappingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingEntry {
    /// Layer the bit window addresses: ethernet, ipv4, ipv6, tcp, udp
    /// or custom (the whole sampled header)
    pub layer: String,
    /// Fire only on the second-or-deeper occurrence of the layer
    #[serde(default)]
    pub encap: bool,
    /// Bit offset within the layer's bytes
    pub offset: u32,
    /// Bit length of the window
    pub length: u32,
    /// Flow attribute receiving the value
    pub destination: String,
}
