//! Metric names emitted by the channel access entities.
//!
//! Every metric carries `node` and `technology` labels. Recording is a no-op
//! unless a recorder has been installed with `metrics::set_global_recorder`.

use crate::Technology;
use metrics::Label;

/// Kind of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic counter.
    Counter,
    /// Distribution of samples.
    Histogram,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => f.write_str("counter"),
            MetricKind::Histogram => f.write_str("histogram"),
        }
    }
}

/// Static description of a metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    /// Metric name.
    pub name: &'static str,
    /// Metric kind.
    pub kind: MetricKind,
    /// Human-readable unit, empty if dimensionless.
    pub unit: &'static str,
    /// Description.
    pub description: &'static str,
}

/// Transmissions handed to the medium.
pub const TX_ATTEMPTS: MetricDef = MetricDef {
    name: "coexsim.access.tx_attempts",
    kind: MetricKind::Counter,
    unit: "",
    description: "Transmissions started on the shared channel",
};

/// Channel time requested by transmissions.
pub const TX_AIRTIME: MetricDef = MetricDef {
    name: "coexsim.access.tx_airtime",
    kind: MetricKind::Counter,
    unit: "us",
    description: "Total airtime of started transmissions",
};

/// Transmissions that ended in collision.
pub const TX_COLLISIONS: MetricDef = MetricDef {
    name: "coexsim.access.tx_collisions",
    kind: MetricKind::Counter,
    unit: "",
    description: "Transmissions that overlapped another transmission",
};

/// Frames or bursts dropped after the retry limit.
pub const FRAMES_DROPPED: MetricDef = MetricDef {
    name: "coexsim.access.frames_dropped",
    kind: MetricKind::Counter,
    unit: "",
    description: "Frames abandoned after exhausting the retry limit",
};

/// Backoff slot draws.
pub const BACKOFF_SLOTS: MetricDef = MetricDef {
    name: "coexsim.access.backoff_slots",
    kind: MetricKind::Histogram,
    unit: "slots",
    description: "Backoff counter drawn from the contention window",
};

/// Aborted listen-before-talk attempts.
pub const LBT_ABORTS: MetricDef = MetricDef {
    name: "coexsim.nru.lbt_aborts",
    kind: MetricKind::Counter,
    unit: "",
    description: "Boundary attempts abandoned because the channel was sensed busy",
};

/// Reservation signal airtime.
pub const RESERVATION_AIRTIME: MetricDef = MetricDef {
    name: "coexsim.nru.reservation_airtime",
    kind: MetricKind::Counter,
    unit: "us",
    description: "Airtime spent on reservation signals in RS mode",
};

/// All metric definitions.
pub const ALL: &[MetricDef] = &[
    TX_ATTEMPTS,
    TX_AIRTIME,
    TX_COLLISIONS,
    FRAMES_DROPPED,
    BACKOFF_SLOTS,
    LBT_ABORTS,
    RESERVATION_AIRTIME,
];

/// Register descriptions for all metrics with the installed recorder.
pub fn describe_metrics() {
    for def in ALL {
        match def.kind {
            MetricKind::Counter => metrics::describe_counter!(def.name, def.description),
            MetricKind::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}

/// Labels attached to every metric a station emits.
pub fn station_labels(node: &str, technology: Technology) -> Vec<Label> {
    vec![
        Label::new("node", node.to_string()),
        Label::new("technology", technology.as_label()),
    ]
}
