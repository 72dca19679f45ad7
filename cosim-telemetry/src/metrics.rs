//! ## cosim-telemetry::metrics
//! **Prometheus exporter for link counters**
//!
//! Each adapter can be given a [`LinkMetrics`] as its instrumentation. It
//! keeps the in-process [`AdapterStats`] snapshot and mirrors every update
//! into counters labelled with the link's socket path.

use cosim_core::{AdapterStats, Instrumentation, LinkStats, MsgType};
use prometheus::{IntCounterVec, Opts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub messages_tx: IntCounterVec,
    pub messages_rx: IntCounterVec,
    pub bytes_tx: IntCounterVec,
    pub bytes_rx: IntCounterVec,
    pub spins: IntCounterVec,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let messages_tx = IntCounterVec::new(
            Opts::new("cosim_messages_tx_total", "Messages sent to the peer"),
            &["link", "type"],
        )?;
        let messages_rx = IntCounterVec::new(
            Opts::new("cosim_messages_rx_total", "Messages received from the peer"),
            &["link", "type"],
        )?;
        let bytes_tx = IntCounterVec::new(
            Opts::new("cosim_bytes_tx_total", "Payload bytes sent to the peer"),
            &["link"],
        )?;
        let bytes_rx = IntCounterVec::new(
            Opts::new("cosim_bytes_rx_total", "Payload bytes received from the peer"),
            &["link"],
        )?;
        let spins = IntCounterVec::new(
            Opts::new("cosim_spins_total", "Busy-wait iterations on a blocked link"),
            &["link", "direction"],
        )?;

        registry.register(Box::new(messages_tx.clone()))?;
        registry.register(Box::new(messages_rx.clone()))?;
        registry.register(Box::new(bytes_tx.clone()))?;
        registry.register(Box::new(bytes_rx.clone()))?;
        registry.register(Box::new(spins.clone()))?;

        Ok(Self {
            registry,
            messages_tx,
            messages_rx,
            bytes_tx,
            bytes_rx,
            spins,
        })
    }

    /// Instrumentation for the link at `path`.
    pub fn link(&self, path: impl Into<String>) -> LinkMetrics {
        LinkMetrics {
            link: path.into(),
            recorder: self.clone(),
            stats: AdapterStats::new(),
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn type_label(ty: MsgType) -> &'static str {
    match ty {
        MsgType::Sync => "sync",
        MsgType::Terminate => "terminate",
        MsgType::Packet => "packet",
    }
}

/// Per-link instrumentation feeding a shared [`MetricsRecorder`].
#[derive(Debug)]
pub struct LinkMetrics {
    link: String,
    recorder: MetricsRecorder,
    stats: AdapterStats,
}

impl LinkMetrics {
    pub fn link(&self) -> &str {
        &self.link
    }
}

impl Instrumentation for LinkMetrics {
    fn message_sent(&self, ty: MsgType, len: usize) {
        self.stats.message_sent(ty, len);
        self.recorder
            .messages_tx
            .with_label_values(&[&self.link, type_label(ty)])
            .inc();
        if ty != MsgType::Sync {
            self.recorder
                .bytes_tx
                .with_label_values(&[&self.link])
                .inc_by(len as u64);
        }
    }

    fn message_received(&self, ty: MsgType, len: usize) {
        self.stats.message_received(ty, len);
        self.recorder
            .messages_rx
            .with_label_values(&[&self.link, type_label(ty)])
            .inc();
        if ty != MsgType::Sync {
            self.recorder
                .bytes_rx
                .with_label_values(&[&self.link])
                .inc_by(len as u64);
        }
    }

    fn tx_alloc_spins(&self, spins: u64) {
        self.stats.tx_alloc_spins(spins);
        self.recorder
            .spins
            .with_label_values(&[&self.link, "tx"])
            .inc_by(spins);
    }

    fn rx_wait_spins(&self, spins: u64) {
        self.stats.rx_wait_spins(spins);
        self.recorder
            .spins
            .with_label_values(&[&self.link, "rx"])
            .inc_by(spins);
    }

    fn snapshot(&self) -> Option<LinkStats> {
        self.stats.snapshot()
    }
}
