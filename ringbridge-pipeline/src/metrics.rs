use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ringbridge_protocol::Packet;
use tracing::info;

use crate::error::{PipelineError, Result};

/// Average Gregorian month, matching the calendar arithmetic the expiry
/// threshold was defined with.
const MONTH_SECS: i64 = 2_629_746;
const EXPIRED_AGE_NS: i64 = 6 * MONTH_SECS * 1_000_000_000;

pub(crate) fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Concurrent counter map: values accumulate across snapshots.
#[derive(Debug, Default)]
pub struct ObservableCounters {
    map: Mutex<BTreeMap<String, i64>>,
}

impl ObservableCounters {
    /// Adds `value` to the key, creating it when absent.
    pub fn add_or_assign(&self, key: &str, value: i64) {
        let mut map = self.map.lock().expect("counter map poisoned");
        *map.entry(key.to_owned()).or_insert(0) += value;
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.map.lock().expect("counter map poisoned").get(key).copied()
    }

    pub fn keys(&self) -> Vec<String> {
        self.map
            .lock()
            .expect("counter map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.lock().expect("counter map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Gauge map: snapshots overwrite. Written only by the fan-out task.
#[derive(Debug, Default)]
pub struct ObservableGauges {
    map: Mutex<BTreeMap<String, f64>>,
}

impl ObservableGauges {
    pub fn insert(&self, key: &str, value: f64) {
        self.map
            .lock()
            .expect("gauge map poisoned")
            .insert(key.to_owned(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.map.lock().expect("gauge map poisoned").get(key).copied()
    }
}

/// Process-wide observable registry the telemetry exporter reads from.
#[derive(Debug, Default)]
pub struct StreamObservables {
    pub valid_packets: ObservableCounters,
    pub future_packets: ObservableCounters,
    pub expired_packets: ObservableCounters,
    pub total_packets: ObservableCounters,
    pub average_latency: ObservableGauges,
    pub average_counts: ObservableGauges,
    pub std_counts: ObservableGauges,
}

impl StreamObservables {
    pub fn new() -> Self {
        Self::default()
    }

    fn register_stream(&self, key: &str) {
        self.valid_packets.add_or_assign(key, 0);
        self.future_packets.add_or_assign(key, 0);
        self.expired_packets.add_or_assign(key, 0);
        self.total_packets.add_or_assign(key, 0);
        self.average_latency.insert(key, 0.0);
        self.average_counts.insert(key, 0.0);
        self.std_counts.insert(key, 0.0);
    }
}

/// Counters for one DataLink writer, observable process-wide.
#[derive(Debug, Default)]
pub struct WriterCounters {
    packets_written: AtomicU64,
    invalid_packets: AtomicU64,
    failed_to_write: AtomicU64,
}

impl WriterCounters {
    pub fn record_written(&self) {
        self.packets_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_write(&self) {
        self.failed_to_write.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written.load(Ordering::Relaxed)
    }

    pub fn invalid_packets(&self) -> u64 {
        self.invalid_packets.load(Ordering::Relaxed)
    }

    pub fn failed_to_write(&self) -> u64 {
        self.failed_to_write.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct RunningState {
    most_recent_sample_ns: i64,
    latency_sum_ns: i64,
    sum: f64,
    sum_squared: f64,
    sample_count: i64,
    valid_packets: i64,
    future_packets: i64,
    expired_packets: i64,
    total_packets: i64,
}

/// Running sums for one stream, serialized by the slot mutex.
struct StreamMetrics {
    name: String,
    key: String,
    state: Mutex<RunningState>,
}

impl StreamMetrics {
    fn new(packet: &Packet) -> Result<Self> {
        let identifier = packet.identifier()?;
        let name = identifier.canonical()?.to_owned();

        let mut key = format!(
            "{}_{}_{}",
            identifier.network()?,
            identifier.station()?,
            identifier.channel()?
        );
        let location = identifier.location_code()?;
        if !location.is_empty() {
            key.push('_');
            key.push_str(location);
        }
        let key = key.to_lowercase();

        info!(stream = %name, "creating metrics slot");
        Ok(Self {
            name,
            key,
            state: Mutex::new(RunningState::default()),
        })
    }

    fn update(&self, packet: &Packet) -> Result<()> {
        if packet.identifier()?.canonical()? != self.name {
            return Err(PipelineError::Metrics(format!(
                "packet for {} landed in slot {}",
                packet.identifier()?.canonical()?,
                self.name
            )));
        }

        let end_time = packet.end_time_ns()?;
        let now = now_ns();
        let mut state = self.state.lock().expect("metrics slot poisoned");
        state.total_packets += 1;

        if end_time > state.most_recent_sample_ns && end_time <= now {
            let (samples, sum, sum_squared) = if packet
                .samples()
                .is_some_and(|samples| samples.is_numeric())
            {
                (
                    packet.sample_count() as i64,
                    packet.sum_samples()?,
                    packet.sum_squared_samples()?,
                )
            } else {
                (0, 0.0, 0.0)
            };
            state.valid_packets += 1;
            state.sample_count += samples;
            state.sum += sum;
            state.sum_squared += sum_squared;
            state.latency_sum_ns += now - end_time;
            state.most_recent_sample_ns = end_time;
        } else if end_time > now {
            state.future_packets += 1;
        } else if end_time < now - EXPIRED_AGE_NS {
            state.expired_packets += 1;
        }
        Ok(())
    }

    fn tabulate_and_reset(&self, interval: Duration, registry: &StreamObservables) {
        let snapshot = {
            let mut state = self.state.lock().expect("metrics slot poisoned");
            let snapshot = std::mem::take(&mut *state);
            // The deduplication cursor survives the reset.
            state.most_recent_sample_ns = snapshot.most_recent_sample_ns;
            snapshot
        };

        let mut average_counts = 0.0;
        let mut variance = 0.0;
        let mut bessel_correction = 1.0;
        if snapshot.sample_count > 0 {
            if snapshot.sample_count > 1 {
                bessel_correction =
                    snapshot.sample_count as f64 / (snapshot.sample_count - 1) as f64;
            }
            average_counts = snapshot.sum / snapshot.sample_count as f64;
            // Var[x] = E[x^2] - E[x]^2
            variance = snapshot.sum_squared / snapshot.sample_count as f64
                - average_counts * average_counts;
        }
        let std_counts = bessel_correction * variance.max(0.0).sqrt();
        let average_latency = if snapshot.valid_packets > 0 {
            snapshot.latency_sum_ns as f64 * 1.0e-9 / snapshot.valid_packets as f64
        } else {
            interval.as_secs_f64()
        };

        registry
            .valid_packets
            .add_or_assign(&self.key, snapshot.valid_packets);
        registry
            .future_packets
            .add_or_assign(&self.key, snapshot.future_packets);
        registry
            .expired_packets
            .add_or_assign(&self.key, snapshot.expired_packets);
        registry
            .total_packets
            .add_or_assign(&self.key, snapshot.total_packets);
        registry.average_latency.insert(&self.key, average_latency);
        registry.average_counts.insert(&self.key, average_counts);
        registry.std_counts.insert(&self.key, std_counts);
    }
}

/// Per-stream metrics slots, owned by the fan-out task.
///
/// Slots are created lazily on the first packet of a stream. Snapshot
/// cadence is guarded here, so tabulation can be requested every tick.
pub struct MetricsMap {
    slots: HashMap<String, StreamMetrics>,
    registry: Arc<StreamObservables>,
    sample_interval: Duration,
    last_sample_ns: i64,
}

impl MetricsMap {
    pub fn new(registry: Arc<StreamObservables>, sample_interval: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            registry,
            sample_interval,
            last_sample_ns: now_ns(),
        }
    }

    pub fn update(&mut self, packet: &Packet) -> Result<()> {
        let name = packet.identifier()?.canonical()?.to_owned();
        match self.slots.get(&name) {
            Some(slot) => slot.update(packet),
            None => {
                let slot = StreamMetrics::new(packet)?;
                self.registry.register_stream(&slot.key);
                slot.update(packet)?;
                self.slots.insert(name, slot);
                Ok(())
            }
        }
    }

    /// Snapshot every slot into the registry, at most once per sample
    /// interval. Streams that blinked out still get their zeros published.
    pub fn tabulate_and_reset_all(&mut self) {
        let now = now_ns();
        if now <= self.last_sample_ns + self.sample_interval.as_nanos() as i64 {
            return;
        }
        self.last_sample_ns = now;
        for slot in self.slots.values() {
            slot.tabulate_and_reset(self.sample_interval, &self.registry);
        }
    }

    pub fn stream_count(&self) -> usize {
        self.slots.len()
    }
}
