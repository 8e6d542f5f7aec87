//! UDP ingestion: worker tasks sharing one socket, per-worker decode
//! state, atomic counters and a periodic stats log.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::CollectorConfig;
use crate::decoder::DecodeStatus;
use crate::extract::ExtractionRule;
use crate::flow::{FieldValue, name};
use crate::format::Formatter;
use crate::producer::{self, ReceiveContext};
use crate::transport::Transport;

/// Everything the per-packet path needs, immutable after startup and
/// shared by all workers without locking.
pub struct Pipeline {
    pub rules: Vec<ExtractionRule>,
    pub formatter: Formatter,
}

#[derive(Default)]
pub struct CollectorMetrics {
    pub udp_packets_received: AtomicU64,
    pub udp_bytes_received: AtomicU64,
    pub datagrams_decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub truncated_datagrams: AtomicU64,
    pub unknown_samples: AtomicU64,
    pub bad_samples: AtomicU64,
    pub unknown_records: AtomicU64,
    pub bad_records: AtomicU64,
    pub flows_produced: AtomicU64,
    pub flows_sent: AtomicU64,
    pub send_errors: AtomicU64,
}

impl CollectorMetrics {
    pub fn apply_status(&self, status: &DecodeStatus) {
        self.unknown_samples
            .fetch_add(u64::from(status.unknown_samples), Ordering::Relaxed);
        self.bad_samples
            .fetch_add(u64::from(status.bad_samples), Ordering::Relaxed);
        self.unknown_records
            .fetch_add(u64::from(status.unknown_records), Ordering::Relaxed);
        self.bad_records
            .fetch_add(u64::from(status.bad_records), Ordering::Relaxed);
        if status.truncated {
            self.truncated_datagrams.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        let mut stats = HashMap::new();
        stats.insert(
            "udp_packets_received".to_string(),
            self.udp_packets_received.load(Ordering::Relaxed),
        );
        stats.insert(
            "udp_bytes_received".to_string(),
            self.udp_bytes_received.load(Ordering::Relaxed),
        );
        stats.insert(
            "datagrams_decoded".to_string(),
            self.datagrams_decoded.load(Ordering::Relaxed),
        );
        stats.insert(
            "decode_errors".to_string(),
            self.decode_errors.load(Ordering::Relaxed),
        );
        stats.insert(
            "truncated_datagrams".to_string(),
            self.truncated_datagrams.load(Ordering::Relaxed),
        );
        stats.insert(
            "unknown_samples".to_string(),
            self.unknown_samples.load(Ordering::Relaxed),
        );
        stats.insert(
            "bad_samples".to_string(),
            self.bad_samples.load(Ordering::Relaxed),
        );
        stats.insert(
            "unknown_records".to_string(),
            self.unknown_records.load(Ordering::Relaxed),
        );
        stats.insert(
            "bad_records".to_string(),
            self.bad_records.load(Ordering::Relaxed),
        );
        stats.insert(
            "flows_produced".to_string(),
            self.flows_produced.load(Ordering::Relaxed),
        );
        stats.insert(
            "flows_sent".to_string(),
            self.flows_sent.load(Ordering::Relaxed),
        );
        stats.insert(
            "send_errors".to_string(),
            self.send_errors.load(Ordering::Relaxed),
        );
        stats
    }
}

pub struct IngestService {
    cfg: CollectorConfig,
    pipeline: Arc<Pipeline>,
    transport: Arc<dyn Transport>,
    metrics: Arc<CollectorMetrics>,
}

impl IngestService {
    pub fn new(
        cfg: CollectorConfig,
        pipeline: Arc<Pipeline>,
        transport: Arc<dyn Transport>,
        metrics: Arc<CollectorMetrics>,
    ) -> Self {
        Self {
            cfg,
            pipeline,
            transport,
            metrics,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let socket = UdpSocket::bind(&self.cfg.listen)
            .await
            .with_context(|| format!("failed to bind {}", self.cfg.listen))?;
        let socket = Arc::new(socket);
        tracing::info!(
            listen = %self.cfg.listen,
            workers = self.cfg.workers,
            "sflow collector listening"
        );

        let mut workers = JoinSet::new();
        for id in 0..self.cfg.workers {
            workers.spawn(worker_loop(
                id,
                Arc::clone(&socket),
                self.cfg.max_packet_size,
                Arc::clone(&self.pipeline),
                Arc::clone(&self.transport),
                Arc::clone(&self.metrics),
                shutdown.clone(),
            ));
        }

        let mut stats_tick = tokio::time::interval(self.cfg.stats_interval);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it.
        stats_tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = stats_tick.tick() => {
                    tracing::info!(stats = ?self.metrics.snapshot(), "collector stats");
                }
            }
        }

        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                if !err.is_cancelled() {
                    tracing::warn!("worker task join error: {err}");
                }
            }
        }

        if let Err(err) = self.transport.flush() {
            tracing::warn!("transport flush failed during shutdown: {err:#}");
        }
        Ok(())
    }
}

async fn worker_loop(
    id: usize,
    socket: Arc<UdpSocket>,
    max_packet_size: usize,
    pipeline: Arc<Pipeline>,
    transport: Arc<dyn Transport>,
    metrics: Arc<CollectorMetrics>,
    shutdown: CancellationToken,
) {
    let mut buffer = vec![0u8; max_packet_size];

    loop {
        let (received, source) = tokio::select! {
            _ = shutdown.cancelled() => break,
            recv = socket.recv_from(&mut buffer) => match recv {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(worker = id, "udp recv error: {err}");
                    continue;
                }
            },
        };
        if received == 0 {
            continue;
        }

        metrics.udp_packets_received.fetch_add(1, Ordering::Relaxed);
        metrics
            .udp_bytes_received
            .fetch_add(received as u64, Ordering::Relaxed);

        let ctx = ReceiveContext {
            time_received_ns: now_ns(),
            source,
        };
        match producer::process_datagram(&buffer[..received], &ctx, &pipeline.rules) {
            Ok((flows, status)) => {
                metrics.datagrams_decoded.fetch_add(1, Ordering::Relaxed);
                metrics.apply_status(&status);
                if !status.ok() {
                    tracing::debug!(
                        worker = id,
                        source = %ctx.source,
                        "truncated datagram; kept what was parsable"
                    );
                }
                metrics
                    .flows_produced
                    .fetch_add(flows.len() as u64, Ordering::Relaxed);

                for flow in &flows {
                    let key = match flow.get(name::SAMPLER_ADDRESS) {
                        Some(FieldValue::Bytes(addr)) => addr.as_slice(),
                        _ => &[],
                    };
                    let value = pipeline.formatter.format(flow);
                    match transport.send(key, &value) {
                        Ok(()) => {
                            metrics.flows_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            metrics.send_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(worker = id, "transport send failed: {err:#}");
                        }
                    }
                }
            }
            Err(err) => {
                metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker = id, %source, "datagram dropped: {err}");
            }
        }
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputFormat, OutputKind, SchemaDocument};
    use crate::decoder::testkit;
    use crate::extract::compile_rules;
    use crate::transport::build_transport;
    use std::net::UdpSocket as StdUdpSocket;
    use std::path::Path;
    use std::time::Duration;

    fn reserve_udp_listen_addr() -> String {
        let sock = StdUdpSocket::bind("127.0.0.1:0").expect("reserve udp listen socket");
        sock.local_addr().expect("read local addr").to_string()
    }

    fn pipeline_from_yaml(yaml: &str) -> Arc<Pipeline> {
        let document: SchemaDocument = serde_yaml::from_str(yaml).unwrap();
        Arc::new(Pipeline {
            rules: compile_rules(&document).unwrap(),
            formatter: Formatter::new(OutputFormat::Json, &document).unwrap(),
        })
    }

    async fn wait_for_content(path: &Path) -> String {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Ok(content) = std::fs::read_to_string(path) {
                    if content.contains('\n') {
                        return content;
                    }
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("no flow emitted in time")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn e2e_udp_datagram_becomes_a_json_line_in_the_output_file() {
        let tmp = tempfile::tempdir().expect("create temp dir");
        let output = tmp.path().join("flows.jsonl");
        let listen = reserve_udp_listen_addr();

        let cfg = CollectorConfig {
            listen: listen.clone(),
            workers: 2,
            output: OutputKind::File,
            output_path: Some(output.clone()),
            stats_interval: Duration::from_millis(100),
            ..Default::default()
        };
        let pipeline = pipeline_from_yaml(
            "formatter:\n  fields: [type, sampling_rate, in_if, out_if, bytes, packets, src_addr, dst_addr, proto, layer_stack]\n",
        );
        let transport = build_transport(&cfg).unwrap();
        let metrics = Arc::new(CollectorMetrics::default());

        let shutdown = CancellationToken::new();
        let service = IngestService::new(
            cfg,
            pipeline,
            Arc::clone(&transport),
            Arc::clone(&metrics),
        );
        let run = tokio::spawn(service.run(shutdown.clone()));

        // Give the service a moment to bind before sending.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let header = testkit::eth_ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 2], 443, 50000);
        let payload = testkit::datagram_with_records(&[testkit::raw_record(1500, &header)]);
        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&payload, &listen).await.unwrap();

        let content = wait_for_content(&output).await;
        shutdown.cancel();
        run.await.unwrap().unwrap();

        let line = content.lines().next().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["type"], "SFLOW_5");
        assert_eq!(parsed["sampling_rate"], 1000);
        assert_eq!(parsed["in_if"], 1);
        assert_eq!(parsed["out_if"], 2);
        assert_eq!(parsed["bytes"], 1500);
        assert_eq!(parsed["packets"], 1);
        assert_eq!(parsed["src_addr"], "10.0.0.1");
        assert_eq!(parsed["dst_addr"], "10.0.0.2");
        assert_eq!(parsed["proto"], "TCP");
        assert_eq!(
            parsed["layer_stack"],
            serde_json::json!(["Ethernet", "IPv4", "TCP"])
        );

        assert_eq!(metrics.udp_packets_received.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.flows_sent.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.decode_errors.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn e2e_garbage_payload_counts_a_decode_error_and_keeps_running() {
        let tmp = tempfile::tempdir().expect("create temp dir");
        let output = tmp.path().join("flows.jsonl");
        let listen = reserve_udp_listen_addr();

        let cfg = CollectorConfig {
            listen: listen.clone(),
            output: OutputKind::File,
            output_path: Some(output.clone()),
            ..Default::default()
        };
        let pipeline = pipeline_from_yaml("formatter:\n  fields: [type, bytes]\n");
        let transport = build_transport(&cfg).unwrap();
        let metrics = Arc::new(CollectorMetrics::default());

        let shutdown = CancellationToken::new();
        let service = IngestService::new(
            cfg,
            pipeline,
            Arc::clone(&transport),
            Arc::clone(&metrics),
        );
        let run = tokio::spawn(service.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        // Version 4 header: fatal per-datagram, collector keeps going.
        sender
            .send_to(&[0, 0, 0, 4, 0, 0, 0, 1], &listen)
            .await
            .unwrap();

        let header = testkit::eth_ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 2], 443, 50000);
        let payload = testkit::datagram_with_records(&[testkit::raw_record(1500, &header)]);
        sender.send_to(&payload, &listen).await.unwrap();

        let content = wait_for_content(&output).await;
        shutdown.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(content.lines().count(), 1);
        assert_eq!(metrics.decode_errors.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.flows_sent.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn metrics_snapshot_reports_every_counter() {
        let metrics = CollectorMetrics::default();
        metrics.udp_packets_received.store(3, Ordering::Relaxed);
        metrics.apply_status(&DecodeStatus {
            unknown_records: 2,
            truncated: true,
            ..Default::default()
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.get("udp_packets_received"), Some(&3));
        assert_eq!(snapshot.get("unknown_records"), Some(&2));
        assert_eq!(snapshot.get("truncated_datagrams"), Some(&1));
        assert_eq!(snapshot.get("flows_sent"), Some(&0));
    }
}
