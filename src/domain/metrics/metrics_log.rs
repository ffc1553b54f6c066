use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::error::Result;

/// One row of the energy metrics table, written once per slot.
///
/// Observed performance comes from an external harness and is left empty when none is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyMetricsRecord {
    pub slot: u64,
    pub timestamp: String,
    pub active_links: usize,
    pub sleeping_links: usize,
    pub estimated_power_w: f64,
    pub observed_throughput_mbps: Option<f64>,
    pub observed_latency_ms: Option<f64>,
    pub dispatched_actions: usize,
    pub confirmed_actions: usize,
    pub rolled_back_actions: usize,
    pub state_transitions: usize,
    pub connectivity_ok: bool,
}

enum MetricsMessage {
    Append(EnergyMetricsRecord),
    Flush,
    Shutdown,
}

/// Append-only CSV log of `EnergyMetricsRecord`s.
///
/// Rows are handed to a background writer thread so the control loop never blocks on file I/O.
pub struct MetricsLog {
    sender: mpsc::Sender<MetricsMessage>,
    worker: Option<JoinHandle<()>>,
}

impl MetricsLog {
    /// Spawns the writer thread. With no path the table goes to stdout.
    pub fn init(path: Option<PathBuf>) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match path {
            Some(p) => {
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                log::info!("Writing energy metrics to {}", p.display());
                Box::new(File::create(p)?)
            }
            None => Box::new(io::stdout()),
        };

        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || Self::worker_loop(rx, writer));

        Ok(MetricsLog { sender: tx, worker: Some(worker) })
    }

    fn worker_loop(rx: mpsc::Receiver<MetricsMessage>, writer: Box<dyn Write + Send>) {
        let mut csv_wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);

        for msg in rx {
            match msg {
                MetricsMessage::Append(record) => {
                    if let Err(e) = csv_wtr.serialize(&record) {
                        log::error!("Metrics Error: Failed to write record for slot {}: {}", record.slot, e);
                    }
                }
                MetricsMessage::Flush => {
                    if let Err(e) = csv_wtr.flush() {
                        log::error!("Metrics Error: Failed to flush: {}", e);
                    }
                }
                MetricsMessage::Shutdown => break,
            }
        }

        let _ = csv_wtr.flush();
    }

    /// Non-blocking. A crashed writer thread loses rows but never stops the control loop.
    pub fn append(&self, record: EnergyMetricsRecord) {
        if self.sender.send(MetricsMessage::Append(record)).is_err() {
            log::error!("Metrics writer is gone; record dropped.");
        }
    }

    pub fn flush(&self) {
        let _ = self.sender.send(MetricsMessage::Flush);
    }

    /// Flushes outstanding rows and waits for the writer thread to finish.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(MetricsMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Metrics writer thread panicked.");
            }
        }
    }
}

impl fmt::Debug for MetricsLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsLog").field("running", &self.worker.is_some()).finish()
    }
}

impl Drop for MetricsLog {
    fn drop(&mut self) {
        self.shutdown();
    }
}
