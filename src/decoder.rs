//! Controller-side telemetry decoding and the latest-value cache.
//!
//! TM[3,25] payloads are decoded against the static structure tables shared
//! with the endpoint defaults, merged last-write-wins into one latest-value
//! map, fanned out to sinks (time-series writers) and pushed to bounded
//! observer queues. Nothing in this path is allowed to unwind the receive
//! loop: malformed reports are counted, sink errors are logged and swallowed,
//! slow observers lose updates.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Instant, SystemTime};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::housekeeping::structure_param_names;
use crate::protocol::PusPacket;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink buffer full")]
    Full,
    #[error("sink unavailable: {0}")]
    Unavailable(&'static str),
}

/// One decoded housekeeping sample bound for a time-series store.
#[derive(Debug, Clone)]
pub struct TelemetryPoint {
    pub structure_id: u16,
    pub parameter: &'static str,
    pub value: f64,
    pub timestamp: SystemTime,
}

/// Destination for decoded points. Implementations must be cheap and
/// non-blocking; errors are swallowed by the store after logging.
pub trait TelemetrySink: Send + Sync {
    fn write_point(&self, point: &TelemetryPoint) -> Result<(), SinkError>;
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn write_point(&self, _point: &TelemetryPoint) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Bounded in-memory point buffer; a stand-in for an external time-series
/// writer. Rejects writes once full until drained.
#[derive(Debug)]
pub struct BufferedPointWriter {
    points: Mutex<VecDeque<TelemetryPoint>>,
    capacity: usize,
}

impl BufferedPointWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn drain(&self) -> Vec<TelemetryPoint> {
        match self.points.lock() {
            Ok(mut points) => points.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.lock().map(|points| points.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for BufferedPointWriter {
    fn write_point(&self, point: &TelemetryPoint) -> Result<(), SinkError> {
        let mut points = self
            .points
            .lock()
            .map_err(|_| SinkError::Unavailable("point buffer poisoned"))?;
        if points.len() >= self.capacity {
            return Err(SinkError::Full);
        }
        points.push_back(point.clone());
        Ok(())
    }
}

/// Snapshot pushed to observers after each decoded report.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub values: HashMap<String, f64>,
    pub timestamp: SystemTime,
}

/// Latest-value cache fed by the controller's receive loop.
pub struct TelemetryStore {
    latest: RwLock<HashMap<&'static str, f64>>,
    report_count: AtomicU64,
    decode_errors: AtomicU64,
    last_update: Mutex<Option<Instant>>,
    sinks: Mutex<Vec<std::sync::Arc<dyn TelemetrySink>>>,
    observers: Mutex<Vec<mpsc::Sender<TelemetrySnapshot>>>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self {
            latest: RwLock::new(HashMap::new()),
            report_count: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            last_update: Mutex::new(None),
            sinks: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn add_sink(&self, sink: std::sync::Arc<dyn TelemetrySink>) {
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.push(sink);
        }
    }

    /// Bounded subscription; a backed-up observer drops updates, a dropped
    /// receiver is pruned on the next notification.
    pub fn subscribe(&self, depth: usize) -> mpsc::Receiver<TelemetrySnapshot> {
        let (tx, rx) = mpsc::channel(depth.max(1));
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(tx);
        }
        rx
    }

    /// Decode one TM[3,25] and merge it into the cache.
    pub fn ingest(&self, tm: &PusPacket) {
        if tm.data.len() < 2 {
            self.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!("HK report too short for a structure id");
            return;
        }
        let structure_id = u16::from_be_bytes([tm.data[0], tm.data[1]]);
        let values: Vec<f64> = tm.data[2..]
            .chunks_exact(4)
            .map(|chunk| f64::from(f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
            .collect();

        let names = structure_param_names(structure_id);
        if names.is_empty() {
            debug!(structure_id, "HK report for unmapped structure");
        }

        let timestamp = SystemTime::now();
        let mut points = Vec::with_capacity(names.len().min(values.len()));
        {
            // Excess values beyond the name list are discarded; a deficit
            // leaves the later names untouched.
            let mut latest = match self.latest.write() {
                Ok(latest) => latest,
                Err(_) => return,
            };
            for (&name, &value) in names.iter().zip(values.iter()) {
                latest.insert(name, value);
                points.push(TelemetryPoint {
                    structure_id,
                    parameter: name,
                    value,
                    timestamp,
                });
            }
        }

        self.report_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_update.lock() {
            *last = Some(Instant::now());
        }

        self.forward_to_sinks(&points);
        self.notify_observers(timestamp);
    }

    fn forward_to_sinks(&self, points: &[TelemetryPoint]) {
        let sinks = match self.sinks.lock() {
            Ok(sinks) => sinks.clone(),
            Err(_) => return,
        };
        for sink in &sinks {
            for point in points {
                if let Err(err) = sink.write_point(point) {
                    warn!(%err, parameter = point.parameter, "telemetry sink write failed");
                }
            }
        }
    }

    fn notify_observers(&self, timestamp: SystemTime) {
        let snapshot = TelemetrySnapshot {
            values: self.snapshot(),
            timestamp,
        };
        if let Ok(mut observers) = self.observers.lock() {
            observers.retain(|observer| match observer.try_send(snapshot.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("observer queue full, dropping update");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    /// Count a telemetry packet that failed to decode upstream.
    pub fn count_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.latest.read().ok()?.get(name).copied()
    }

    pub fn snapshot(&self) -> HashMap<String, f64> {
        match self.latest.read() {
            Ok(latest) => latest
                .iter()
                .map(|(&name, &value)| (name.to_owned(), value))
                .collect(),
            Err(_) => HashMap::new(),
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.latest.read().map(|latest| latest.len()).unwrap_or(0)
    }

    pub fn report_count(&self) -> u64 {
        self.report_count.load(Ordering::Relaxed)
    }

    pub fn decode_error_count(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn seconds_since_update(&self) -> Option<f64> {
        self.last_update
            .lock()
            .ok()?
            .map(|at| at.elapsed().as_secs_f64())
    }
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore")
            .field("parameters", &self.parameter_count())
            .field("reports", &self.report_count())
            .field("decode_errors", &self.decode_error_count())
            .finish_non_exhaustive()
    }
}
