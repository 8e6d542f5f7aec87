//! Downstream transports. The collector is best-effort: a failed send
//! is counted and the flow is dropped, never retried.

use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::config::{CollectorConfig, OutputKind};

/// One serialized flow at a time. The key carries the sampler address
/// bytes for transports that partition by agent; the stdout and file
/// transports ignore it.
pub trait Transport: Send + Sync {
    fn send(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

pub struct StdoutTransport;

impl Transport for StdoutTransport {
    fn send(&self, _key: &[u8], value: &[u8]) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(value).context("stdout write failed")
    }

    fn flush(&self) -> Result<()> {
        std::io::stdout().lock().flush().context("stdout flush failed")
    }
}

pub struct FileTransport {
    // Line buffering keeps JSON lines visible to tail-style consumers
    // as soon as they are written.
    writer: Mutex<LineWriter<File>>,
}

impl FileTransport {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open output file {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(LineWriter::new(file)),
        })
    }
}

impl Transport for FileTransport {
    fn send(&self, _key: &[u8], value: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().expect("file transport poisoned");
        writer.write_all(value).context("file write failed")
    }

    fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock().expect("file transport poisoned");
        writer.flush().context("file flush failed")
    }
}

pub fn build_transport(cfg: &CollectorConfig) -> Result<Arc<dyn Transport>> {
    match cfg.output {
        OutputKind::Stdout => Ok(Arc::new(StdoutTransport)),
        OutputKind::File => {
            let path = cfg
                .output_path
                .as_ref()
                .context("--output=file requires --output-path")?;
            Ok(Arc::new(FileTransport::create(path)?))
        }
    }
}
