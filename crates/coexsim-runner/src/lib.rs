//! # coexsim-runner library
//!
//! Drives built simulations to completion and reduces their transmission
//! logs to per-run reports.
//!
//! One [`EventLoop`] owns everything a run mutates, so independent runs of a
//! batch execute on the `rayon` pool without sharing state. Run `i` of a
//! configuration uses seed `simulation.seed + i`; results are returned in
//! run order regardless of completion order.

pub mod calibration;
pub mod metrics_export;
pub mod summary;

pub use coexsim_common::SimTime;
use coexsim_common::{
    AccessCounters, EntityId, EntityRegistry, Event, EventId, EventPayload, SimContext, SimError,
    Technology, TransmissionRecord, WirelessMedium,
};
use coexsim_model::{build_simulation, CwStrategy, RunConfig};
use coexsim_radio::NruMode;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BinaryHeap;
use std::time::Instant;
pub use summary::{summarize, RunSummary, TechnologySummary};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while running simulations.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Model error.
    #[error("Model error: {0}")]
    Model(#[from] coexsim_model::ModelError),

    /// Simulation error.
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// ============================================================================
// Simulation Statistics
// ============================================================================

/// Bookkeeping of one event loop run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationStats {
    /// Total events processed.
    pub total_events: u64,
    /// Virtual time reached.
    pub simulation_time_us: u64,
    /// Wall time spent in the loop.
    pub wall_time_ms: u64,
}

// ============================================================================
// Event Loop
// ============================================================================

/// Virtual-time scheduler of one run.
///
/// Pops events in `(time, id)` order. Event ids come from the context's
/// counter, so equal-time events run in the order they were scheduled.
pub struct EventLoop {
    event_queue: BinaryHeap<Event>,
    entities: EntityRegistry,
    context: SimContext,
    stats: SimulationStats,
}

impl EventLoop {
    /// Create an event loop over `entities`, seeding the run's generator with
    /// `seed`. Initial events are renumbered in the order given.
    pub fn new(entities: EntityRegistry, initial_events: Vec<Event>, seed: u64) -> Self {
        let mut context = SimContext::new(seed);
        let mut event_queue = BinaryHeap::with_capacity(initial_events.len());
        for mut event in initial_events {
            event.id = EventId(context.next_event_id());
            event_queue.push(event);
        }

        EventLoop {
            event_queue,
            entities,
            context,
            stats: SimulationStats::default(),
        }
    }

    /// Enqueue a resumption of `entity` at absolute time `at`.
    pub fn schedule(&mut self, entity: EntityId, at: SimTime, payload: EventPayload) -> Result<(), SimError> {
        if at < self.context.time() {
            return Err(SimError::TimeWentBackwards {
                now: self.context.time(),
                requested: at,
            });
        }
        self.event_queue.push(Event {
            id: EventId(self.context.next_event_id()),
            time: at,
            source: entity,
            targets: vec![entity],
            payload,
        });
        Ok(())
    }

    /// Process events until the queue is empty or the next event lies beyond
    /// `end_time`. Events at exactly `end_time` are processed.
    pub fn run_until(&mut self, end_time: SimTime) -> Result<SimulationStats, RunnerError> {
        if end_time < self.context.time() {
            return Err(SimError::TimeWentBackwards {
                now: self.context.time(),
                requested: end_time,
            }
            .into());
        }
        let start = Instant::now();

        // Sorts after every other event at `end_time`.
        self.event_queue.push(Event {
            id: EventId(u64::MAX),
            time: end_time,
            source: EntityId::new(0),
            targets: vec![],
            payload: EventPayload::SimulationEnd,
        });

        while let Some(event) = self.event_queue.pop() {
            if matches!(event.payload, EventPayload::SimulationEnd) {
                self.context.set_time(event.time);
                break;
            }
            if event.time < self.context.time() {
                return Err(SimError::TimeWentBackwards {
                    now: self.context.time(),
                    requested: event.time,
                }
                .into());
            }

            self.context.set_time(event.time);
            self.entities.dispatch_event(&event, &mut self.context)?;
            self.event_queue.extend(self.context.take_pending_events());
            self.stats.total_events += 1;
        }

        // Later calls continue from where this one stopped.
        self.event_queue
            .retain(|e| !matches!(e.payload, EventPayload::SimulationEnd));

        self.stats.simulation_time_us = self.context.time().as_micros();
        self.stats.wall_time_ms += start.elapsed().as_millis() as u64;
        Ok(self.stats.clone())
    }

    /// Current virtual time.
    pub fn current_time(&self) -> SimTime {
        self.context.time()
    }

    /// The shared channel of this run.
    pub fn medium(&self) -> &WirelessMedium {
        self.context.medium()
    }

    /// Outcome counters of this run.
    pub fn counters(&self) -> &AccessCounters {
        self.context.counters()
    }

    /// Statistics so far.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Consume the loop, returning the channel and counters.
    pub fn into_parts(self) -> (WirelessMedium, AccessCounters) {
        self.context.into_parts()
    }
}

// ============================================================================
// Run Reports
// ============================================================================

/// Per-station outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct StationReport {
    /// Node name.
    pub name: String,
    /// Technology.
    pub technology: Technology,
    /// Entity ID.
    pub entity_id: EntityId,
    /// Desynchronization offset of a gNB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desync_offset_us: Option<u64>,
    /// Finalized transmissions.
    pub transmissions: u64,
    /// Transmissions without overlap.
    pub successes: u64,
    /// Transmissions that collided.
    pub collisions: u64,
    /// Requested airtime of finalized transmissions.
    pub airtime_us: u64,
    /// Channel time attributed to the station after apportioning overlaps.
    pub channel_time_us: f64,
}

/// Everything reported for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run index within the batch.
    pub run: u32,
    /// Seed of this run.
    pub seed: u64,
    /// Wi-Fi stations.
    pub wifi_nodes: u32,
    /// NR-U gNBs.
    pub nru_nodes: u32,
    /// NR-U access mode.
    pub nru_mode: NruMode,
    /// Solver-sized Wi-Fi window, when dynamic sizing was selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_cw: Option<u32>,
    /// Channel metrics.
    pub summary: RunSummary,
    /// Protocol outcome counters.
    pub counters: AccessCounters,
    /// Per-station breakdown.
    pub stations: Vec<StationReport>,
    /// Event loop statistics.
    pub stats: SimulationStats,
    /// Transmissions in flight at the end of the run, excluded from metrics.
    pub truncated_transmissions: usize,
    /// Finalized records, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<TransmissionRecord>>,
}

/// Size the dynamic Wi-Fi window with the configured strategy, or `None`
/// when the window is configured explicitly.
pub fn resolve_dynamic_cw(config: &RunConfig) -> Result<Option<u32>, RunnerError> {
    if !config.uses_dynamic_cw() {
        return Ok(None);
    }
    match config.dynamic_cw.strategy {
        CwStrategy::ClosedForm => Ok(config.closed_form_cw()?),
        CwStrategy::Calibration => Ok(Some(calibration::calibrate(config)?.cw)),
    }
}

/// Build and run one run of `config`, using seed `simulation.seed + run`.
pub fn run_once(config: &RunConfig, run: u32, include_records: bool) -> Result<RunReport, RunnerError> {
    let dynamic_cw = resolve_dynamic_cw(config)?;
    execute_run(config, run, include_records, dynamic_cw)
}

pub(crate) fn execute_run(
    config: &RunConfig,
    run: u32,
    include_records: bool,
    dynamic_cw: Option<u32>,
) -> Result<RunReport, RunnerError> {
    let seed = config.simulation.seed.wrapping_add(u64::from(run));
    let built = build_simulation(config, seed, dynamic_cw)?;
    tracing::info!(
        "Run {} (seed {}): {} wifi, {} nru, {} mode, {} us",
        run,
        seed,
        config.nodes.wifi,
        config.nodes.nru,
        config.nru.mode,
        config.simulation.duration_us
    );

    let mut event_loop = EventLoop::new(built.entities, built.initial_events, seed);
    let stats = event_loop.run_until(config.duration())?;
    let (medium, counters) = event_loop.into_parts();
    let truncated_transmissions = medium.in_flight();
    let records = medium.into_records();

    let summary = summarize(&records, config.duration());
    let channel_time = summary::airtime_by_owner(&records);
    let stations = built
        .stations
        .into_iter()
        .map(|info| {
            let mut report = StationReport {
                name: info.name,
                technology: info.technology,
                entity_id: info.entity_id,
                desync_offset_us: info.desync_offset_us,
                transmissions: 0,
                successes: 0,
                collisions: 0,
                airtime_us: 0,
                channel_time_us: channel_time.get(&info.entity_id).copied().unwrap_or(0.0),
            };
            for record in records.iter().filter(|r| r.owner == info.entity_id) {
                report.transmissions += 1;
                report.airtime_us += record.duration.as_micros();
                if record.is_success() {
                    report.successes += 1;
                } else {
                    report.collisions += 1;
                }
            }
            report
        })
        .collect();

    tracing::info!(
        "Run {} finished: {} events, occupancy {:.3} wifi / {:.3} nru, collision probability {:.3}, JFI {:.3}",
        run,
        stats.total_events,
        summary.channel_occupancy_wifi,
        summary.channel_occupancy_nru,
        summary.collision_probability,
        summary.jain_fairness_index
    );

    Ok(RunReport {
        run,
        seed,
        wifi_nodes: config.nodes.wifi,
        nru_nodes: config.nodes.nru,
        nru_mode: config.nru.mode,
        dynamic_cw: built.dynamic_cw,
        summary,
        counters,
        stations,
        stats,
        truncated_transmissions,
        records: include_records.then_some(records),
    })
}

/// Run every configured run in parallel. Reports are ordered by run index;
/// the first failing run aborts the batch.
///
/// A dynamic Wi-Fi window is sized once and shared by all runs.
pub fn run_many(config: &RunConfig, include_records: bool) -> Result<Vec<RunReport>, RunnerError> {
    config.validate()?;
    let dynamic_cw = resolve_dynamic_cw(config)?;
    (0..config.simulation.runs)
        .into_par_iter()
        .map(|run| execute_run(config, run, include_records, dynamic_cw))
        .collect()
}
