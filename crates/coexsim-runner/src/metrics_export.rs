//! In-memory collection and export of the per-station access metrics.
//!
//! Stations emit through the `metrics` facade with `node` and `technology`
//! labels. [`InMemoryRecorder`] keeps one cell per labelled key and folds
//! them into totals plus per-node and per-technology breakdowns when a
//! snapshot is taken. Gauges are not emitted by any station and are dropped.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Snapshot Types
// ============================================================================

/// Metric values of one label value (a node or a technology).
#[derive(Debug, Default, Clone, Serialize)]
pub struct GroupMetrics {
    /// Counter totals by metric name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
    /// Histogram summaries by metric name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Collected metric data for export.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Wall-clock time the snapshot was taken.
    pub timestamp: String,
    /// Counter totals across all stations.
    pub counters: BTreeMap<String, u64>,
    /// Histogram summaries across all stations.
    pub histograms: BTreeMap<String, HistogramSummary>,
    /// Breakdown by the `technology` label.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub technologies: BTreeMap<String, GroupMetrics>,
    /// Breakdown by the `node` label.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, GroupMetrics>,
}

/// Summary statistics for a histogram metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSummary {
    /// Number of samples recorded.
    pub count: u64,
    /// Sum of all samples.
    pub sum: f64,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// Mean value.
    pub mean: f64,
    /// Median.
    pub p50: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 99th percentile.
    pub p99: f64,
}

// ============================================================================
// Export Functions
// ============================================================================

/// Export a snapshot as pretty-printed JSON.
pub fn export_json<W: Write>(snapshot: &MetricsSnapshot, writer: &mut W) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, snapshot)?;
    writeln!(writer)?;
    Ok(())
}

/// Export a snapshot in Prometheus text exposition format.
///
/// Counters are written as totals and per node. Histograms are written as
/// summaries with `_sum` and `_count` series.
pub fn export_prometheus<W: Write>(
    snapshot: &MetricsSnapshot,
    descriptions: &BTreeMap<String, String>,
    writer: &mut W,
) -> std::io::Result<()> {
    for (name, value) in &snapshot.counters {
        let prom_name = prometheus_name(name);
        if let Some(help) = descriptions.get(name) {
            writeln!(writer, "# HELP {} {}", prom_name, help)?;
        }
        writeln!(writer, "# TYPE {} counter", prom_name)?;
        writeln!(writer, "{} {}", prom_name, value)?;
        for (node, group) in &snapshot.nodes {
            if let Some(value) = group.counters.get(name) {
                writeln!(writer, "{}{{node=\"{}\"}} {}", prom_name, node, value)?;
            }
        }
    }

    for (name, summary) in &snapshot.histograms {
        let prom_name = prometheus_name(name);
        if let Some(help) = descriptions.get(name) {
            writeln!(writer, "# HELP {} {}", prom_name, help)?;
        }
        writeln!(writer, "# TYPE {} summary", prom_name)?;
        writeln!(writer, "{}{{quantile=\"0.5\"}} {}", prom_name, summary.p50)?;
        writeln!(writer, "{}{{quantile=\"0.9\"}} {}", prom_name, summary.p90)?;
        writeln!(writer, "{}{{quantile=\"0.99\"}} {}", prom_name, summary.p99)?;
        writeln!(writer, "{}_sum {}", prom_name, summary.sum)?;
        writeln!(writer, "{}_count {}", prom_name, summary.count)?;
    }

    Ok(())
}

fn prometheus_name(name: &str) -> String {
    name.replace('.', "_")
}

// ============================================================================
// In-Memory Recorder
// ============================================================================

#[derive(Debug, Default)]
struct CounterState {
    value: AtomicU64,
}

impl CounterState {
    fn increment(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Maximum number of samples kept per histogram key for percentiles.
const HISTOGRAM_RESERVOIR_SIZE: usize = 10_000;

/// One histogram key: exact count, sum and extremes plus a uniform sample of
/// at most [`HISTOGRAM_RESERVOIR_SIZE`] values (Algorithm R).
#[derive(Debug)]
struct HistogramState {
    inner: Mutex<HistogramData>,
}

#[derive(Debug)]
struct HistogramData {
    reservoir: Vec<f64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    rng: ChaCha8Rng,
}

impl Default for HistogramState {
    fn default() -> Self {
        HistogramState {
            inner: Mutex::new(HistogramData {
                reservoir: Vec::new(),
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                rng: ChaCha8Rng::seed_from_u64(0x1234_5678_9ABC_DEF0),
            }),
        }
    }
}

impl HistogramState {
    fn record(&self, value: f64) {
        let mut data = self.inner.lock();
        data.count += 1;
        data.sum += value;
        data.min = data.min.min(value);
        data.max = data.max.max(value);

        if data.reservoir.len() < HISTOGRAM_RESERVOIR_SIZE {
            data.reservoir.push(value);
        } else {
            let count = data.count;
            let j = data.rng.gen_range(0..count) as usize;
            if j < HISTOGRAM_RESERVOIR_SIZE {
                data.reservoir[j] = value;
            }
        }
    }

    fn sample(&self) -> HistogramSample {
        let data = self.inner.lock();
        let weight = if data.reservoir.is_empty() {
            0.0
        } else {
            data.count as f64 / data.reservoir.len() as f64
        };
        HistogramSample {
            count: data.count,
            sum: data.sum,
            min: data.min,
            max: data.max,
            weighted: data.reservoir.iter().map(|&v| (v, weight)).collect(),
        }
    }
}

/// Histogram data that can be merged across keys. Each retained value
/// carries the number of recorded samples it stands for.
#[derive(Debug, Clone)]
struct HistogramSample {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    weighted: Vec<(f64, f64)>,
}

impl Default for HistogramSample {
    fn default() -> Self {
        HistogramSample {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            weighted: Vec::new(),
        }
    }
}

impl HistogramSample {
    fn merge(&mut self, other: &HistogramSample) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.weighted.extend_from_slice(&other.weighted);
    }

    fn summary(&self) -> HistogramSummary {
        if self.count == 0 || self.weighted.is_empty() {
            return HistogramSummary {
                count: 0,
                sum: 0.0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                p50: 0.0,
                p90: 0.0,
                p99: 0.0,
            };
        }

        let mut sorted = self.weighted.clone();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        let total: f64 = sorted.iter().map(|(_, w)| w).sum();

        // Smallest value whose cumulative weight reaches `p` percent.
        let percentile = |p: f64| -> f64 {
            let target = p / 100.0 * total;
            let mut cumulative = 0.0;
            for &(value, weight) in &sorted {
                cumulative += weight;
                if cumulative >= target {
                    return value;
                }
            }
            sorted[sorted.len() - 1].0
        };

        HistogramSummary {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            mean: self.sum / self.count as f64,
            p50: percentile(50.0),
            p90: percentile(90.0),
            p99: percentile(99.0),
        }
    }
}

#[derive(Debug, Clone)]
struct KeyMetadata {
    name: String,
    labels: Vec<(String, String)>,
}

impl KeyMetadata {
    fn from_key(key: &Key) -> Self {
        KeyMetadata {
            name: key.name().to_string(),
            labels: key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect(),
        }
    }

    fn label_value(&self, key: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    counters: RwLock<BTreeMap<String, Arc<CounterState>>>,
    histograms: RwLock<BTreeMap<String, Arc<HistogramState>>>,
    key_metadata: RwLock<BTreeMap<String, KeyMetadata>>,
    descriptions: RwLock<BTreeMap<String, String>>,
}

/// Unique string for a key and its labels, `name|k=v,k=v`.
fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();

    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}|{}", key.name(), labels.join(","))
    }
}

fn get_or_create<T: Default>(
    cells: &RwLock<BTreeMap<String, Arc<T>>>,
    metadata: &RwLock<BTreeMap<String, KeyMetadata>>,
    key: &Key,
) -> Arc<T> {
    let key_str = key_to_string(key);
    if let Some(cell) = cells.read().get(&key_str) {
        return cell.clone();
    }
    metadata
        .write()
        .entry(key_str.clone())
        .or_insert_with(|| KeyMetadata::from_key(key));
    cells.write().entry(key_str).or_default().clone()
}

impl RecorderState {
    fn counter(&self, key: &Key) -> Arc<CounterState> {
        get_or_create(&self.counters, &self.key_metadata, key)
    }

    fn histogram(&self, key: &Key) -> Arc<HistogramState> {
        get_or_create(&self.histograms, &self.key_metadata, key)
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let metadata = self.key_metadata.read();

        let mut counters: BTreeMap<String, u64> = BTreeMap::new();
        let mut technologies: BTreeMap<String, GroupMetrics> = BTreeMap::new();
        let mut nodes: BTreeMap<String, GroupMetrics> = BTreeMap::new();

        for (key_str, counter) in self.counters.read().iter() {
            let Some(meta) = metadata.get(key_str) else { continue };
            let value = counter.get();
            *counters.entry(meta.name.clone()).or_insert(0) += value;
            for (label, groups) in [("technology", &mut technologies), ("node", &mut nodes)] {
                if let Some(group) = meta.label_value(label) {
                    let entry = groups.entry(group.to_string()).or_default();
                    *entry.counters.entry(meta.name.clone()).or_insert(0) += value;
                }
            }
        }

        let mut totals: BTreeMap<String, HistogramSample> = BTreeMap::new();
        let mut by_technology: BTreeMap<(String, String), HistogramSample> = BTreeMap::new();
        for (key_str, histogram) in self.histograms.read().iter() {
            let Some(meta) = metadata.get(key_str) else { continue };
            let sample = histogram.sample();
            if let Some(node) = meta.label_value("node") {
                nodes
                    .entry(node.to_string())
                    .or_default()
                    .histograms
                    .insert(meta.name.clone(), sample.summary());
            }
            if let Some(tech) = meta.label_value("technology") {
                by_technology
                    .entry((tech.to_string(), meta.name.clone()))
                    .or_default()
                    .merge(&sample);
            }
            totals.entry(meta.name.clone()).or_default().merge(&sample);
        }

        for ((tech, name), sample) in by_technology {
            technologies
                .entry(tech)
                .or_default()
                .histograms
                .insert(name, sample.summary());
        }

        let histograms = totals
            .into_iter()
            .map(|(name, sample)| (name, sample.summary()))
            .collect();

        MetricsSnapshot {
            timestamp,
            counters,
            histograms,
            technologies,
            nodes,
        }
    }
}

/// Metrics recorder that keeps everything in memory for export after the
/// batch completes. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecorder {
    state: Arc<RecorderState>,
}

impl InMemoryRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of all current metric values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.snapshot()
    }

    /// Descriptions registered through `describe_*`, by metric name.
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.state.descriptions.read().clone()
    }

    fn describe(&self, key: KeyName, description: SharedString) {
        self.state
            .descriptions
            .write()
            .insert(key.as_str().to_string(), description.to_string());
    }
}

struct InMemoryCounter {
    state: Arc<CounterState>,
}

impl metrics::CounterFn for InMemoryCounter {
    fn increment(&self, value: u64) {
        self.state.increment(value);
    }

    fn absolute(&self, value: u64) {
        self.state.value.fetch_max(value, Ordering::Relaxed);
    }
}

struct InMemoryHistogram {
    state: Arc<HistogramState>,
}

impl metrics::HistogramFn for InMemoryHistogram {
    fn record(&self, value: f64) {
        self.state.record(value);
    }
}

impl Recorder for InMemoryRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let state = self.state.counter(key);
        Counter::from_arc(Arc::new(InMemoryCounter { state }))
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let state = self.state.histogram(key);
        Histogram::from_arc(Arc::new(InMemoryHistogram { state }))
    }
}
