//! # coexsim-model
//!
//! YAML run configuration and simulation building for the coexistence engine.
//!
//! This crate provides:
//! - YAML schema types for run configurations ([`RunConfig`])
//! - Configuration loading and validation ([`load_config`], [`RunConfig::validate`])
//! - Simulation building from a validated configuration ([`build_simulation`])
//! - Closed-form sizing of the dynamic Wi-Fi window ([`RunConfig::closed_form_cw`])
//!
//! Every field has a default, so an empty mapping (`{}`) is a valid
//! configuration: one Wi-Fi station and one Gap-mode gNB for 100 ms.

use coexsim_common::{EntityId, EntityRegistry, Event, EventId, EventPayload, SimTime, Technology};
use coexsim_radio::dynamic_cw::{CwSearchRange, SolverModel};
use coexsim_radio::{
    mcs_entry, ppdu_airtime, ContentionWindow, NruBaseStation, NruConfig, NruMode, RadioError,
    SyncSchedule, WifiStation, WifiStationConfig, WifiTiming, TIMER_START,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading a configuration or building a run.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Radio parameters could not be resolved.
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// ============================================================================
// Configuration Schema
// ============================================================================

/// Run length, seed and repetition count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationParams {
    /// Simulated time per run in microseconds.
    pub duration_us: u64,
    /// Seed of the first run; run `i` uses `seed + i`.
    pub seed: u64,
    /// Number of independent runs.
    pub runs: u32,
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            duration_us: 100_000,
            seed: 1,
            runs: 1,
        }
    }
}

/// Number of contenders of each technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeCounts {
    /// Wi-Fi stations.
    pub wifi: u32,
    /// NR-U gNBs.
    pub nru: u32,
}

impl Default for NodeCounts {
    fn default() -> Self {
        NodeCounts { wifi: 1, nru: 1 }
    }
}

/// Wi-Fi station parameters, shared by every station of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WifiParams {
    /// MAC payload per frame in bytes.
    pub payload_bytes: u32,
    /// MCS index into the rate table.
    pub mcs: u8,
    /// Minimum contention window. `0` together with `max_cw: 0` selects
    /// dynamic sizing.
    pub min_cw: u32,
    /// Maximum contention window.
    pub max_cw: u32,
    /// Attempts per frame.
    pub retry_limit: u32,
}

impl Default for WifiParams {
    fn default() -> Self {
        WifiParams {
            payload_bytes: 1472,
            mcs: 7,
            min_cw: 15,
            max_cw: 63,
            retry_limit: 7,
        }
    }
}

/// NR-U gNB parameters, shared by every gNB of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NruParams {
    /// Gap or reservation-signal access.
    pub mode: NruMode,
    /// Defer period preceding the observation slots.
    pub prioritization_period_us: u64,
    /// Observation (and backoff) slot.
    pub observation_slot_us: u64,
    /// Observation slots sensed after the prioritization period.
    pub observation_slots: u32,
    /// Synchronization slot.
    pub sync_slot_us: u64,
    /// Lower bound of the desynchronization offset (inclusive).
    pub min_sync_desync_us: u64,
    /// Upper bound of the desynchronization offset (exclusive).
    pub max_sync_desync_us: u64,
    /// Minimum contention window.
    pub min_cw: u32,
    /// Maximum contention window.
    pub max_cw: u32,
    /// Consecutive collisions before a burst is dropped.
    pub retry_limit: u32,
    /// Maximum channel occupancy time.
    pub mcot_us: u64,
    /// Transmit right after a clean sense.
    pub backoff_disabled: bool,
}

impl Default for NruParams {
    fn default() -> Self {
        NruParams {
            mode: NruMode::Gap,
            prioritization_period_us: 16,
            observation_slot_us: 9,
            observation_slots: 3,
            sync_slot_us: 1000,
            min_sync_desync_us: 0,
            max_sync_desync_us: 1000,
            min_cw: 15,
            max_cw: 63,
            retry_limit: 7,
            mcot_us: 6000,
            backoff_disabled: false,
        }
    }
}

impl NruParams {
    /// Prioritization period plus all observation slots, `None` if the sum
    /// does not fit the clock.
    pub fn sensing_window(&self) -> Option<SimTime> {
        let slots = SimTime::from_micros(self.observation_slot_us).checked_times(self.observation_slots)?;
        SimTime::from_micros(self.prioritization_period_us).checked_add(slots)
    }

    /// Longest stretch one access cycle can schedule ahead: boundary wait,
    /// sensing, a full backoff and the burst.
    fn cycle_span(&self) -> Option<SimTime> {
        let backoff = SimTime::from_micros(self.observation_slot_us).checked_times(self.max_cw)?;
        SimTime::from_micros(self.max_sync_desync_us)
            .checked_add(SimTime::from_micros(self.sync_slot_us))?
            .checked_add(self.sensing_window()?)?
            .checked_add(backoff)?
            .checked_add(SimTime::from_micros(self.mcot_us))
    }
}

/// How the dynamic Wi-Fi window is sized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CwStrategy {
    /// Saturated-DCF throughput optimum, computed in closed form.
    #[default]
    ClosedForm,
    /// Short calibration runs over the search grid; the window where Wi-Fi
    /// and NR-U occupancy cross wins.
    Calibration,
}

impl std::fmt::Display for CwStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CwStrategy::ClosedForm => write!(f, "closed_form"),
            CwStrategy::Calibration => write!(f, "calibration"),
        }
    }
}

/// Dynamic contention window sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DynamicCwParams {
    /// Sizing method.
    pub strategy: CwStrategy,
    /// Smallest candidate window.
    pub min_cw: u32,
    /// Largest candidate window.
    pub max_cw: u32,
    /// Spacing of the calibration grid.
    pub step: u32,
    /// Simulated time of each calibration run.
    pub calibration_duration_us: u64,
    /// Calibration runs averaged per grid point.
    pub calibration_runs: u32,
}

impl Default for DynamicCwParams {
    fn default() -> Self {
        let range = CwSearchRange::default();
        DynamicCwParams {
            strategy: CwStrategy::ClosedForm,
            min_cw: range.min_cw,
            max_cw: range.max_cw,
            step: 48,
            calibration_duration_us: 100_000,
            calibration_runs: 3,
        }
    }
}

impl DynamicCwParams {
    /// Candidate range handed to the solvers.
    pub fn range(&self) -> CwSearchRange {
        CwSearchRange {
            min_cw: self.min_cw,
            max_cw: self.max_cw,
        }
    }
}

/// Complete configuration of a batch of runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Run length, seed and repetition count.
    pub simulation: SimulationParams,
    /// Contender counts.
    pub nodes: NodeCounts,
    /// Wi-Fi parameters.
    pub wifi: WifiParams,
    /// NR-U parameters.
    pub nru: NruParams,
    /// Dynamic contention window sizing.
    pub dynamic_cw: DynamicCwParams,
}

impl RunConfig {
    /// Whether Wi-Fi stations get a solver-sized fixed window.
    pub fn uses_dynamic_cw(&self) -> bool {
        self.wifi.min_cw == 0 && self.wifi.max_cw == 0
    }

    /// Simulated time per run.
    pub fn duration(&self) -> SimTime {
        SimTime::from_micros(self.simulation.duration_us)
    }

    /// Airtime of one Wi-Fi data frame.
    pub fn wifi_frame_airtime(&self) -> Result<SimTime, ModelError> {
        Ok(ppdu_airtime(self.wifi.payload_bytes, self.wifi.mcs)?)
    }

    /// Latest time a run may compute: the run length plus two access cycles
    /// of each technology. `None` if it does not fit the clock.
    fn time_horizon(&self) -> Option<SimTime> {
        let timing = WifiTiming::default();
        let widest_cw = self.wifi.max_cw.max(self.dynamic_cw.max_cw);
        let wifi_cycle = self
            .wifi_frame_airtime()
            .ok()?
            .checked_add(timing.ack_timeout)?
            .checked_add(timing.difs)?
            .checked_add(timing.slot.checked_times(widest_cw)?)?;
        let cycle = wifi_cycle.checked_add(self.nru.cycle_span()?)?;
        self.duration().checked_add(cycle)?.checked_add(cycle)
    }

    /// Closed-form dynamic window for this configuration's node counts, or
    /// `None` when the Wi-Fi window is configured explicitly.
    pub fn closed_form_cw(&self) -> Result<Option<u32>, ModelError> {
        if !self.uses_dynamic_cw() {
            return Ok(None);
        }
        let model = SolverModel::for_frame(self.wifi.payload_bytes, self.wifi.mcs)?;
        Ok(Some(model.solve(self.nodes.wifi, self.nodes.nru, self.dynamic_cw.range())))
    }

    /// Check every constraint a run relies on.
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: String| Err(ModelError::InvalidConfig(msg));

        if self.simulation.duration_us == 0 {
            return invalid("simulation.duration_us must be positive".into());
        }
        if self.simulation.runs == 0 {
            return invalid("simulation.runs must be at least 1".into());
        }

        let wifi = &self.wifi;
        mcs_entry(wifi.mcs)?;
        if wifi.payload_bytes == 0 {
            return invalid("wifi.payload_bytes must be positive".into());
        }
        if wifi.min_cw > wifi.max_cw {
            return invalid(format!("wifi.min_cw {} exceeds wifi.max_cw {}", wifi.min_cw, wifi.max_cw));
        }
        if wifi.retry_limit == 0 {
            return invalid("wifi.retry_limit must be at least 1".into());
        }

        let nru = &self.nru;
        if nru.sync_slot_us == 0 || nru.observation_slot_us == 0 || nru.mcot_us == 0 {
            return invalid("nru durations (sync_slot_us, observation_slot_us, mcot_us) must be positive".into());
        }
        if nru.observation_slots == 0 {
            return invalid("nru.observation_slots must be at least 1".into());
        }
        let Some(sensing_window) = nru.sensing_window() else {
            return invalid("nru sensing window (prioritization period plus observation slots) overflows".into());
        };
        if sensing_window >= SimTime::from_micros(nru.sync_slot_us) {
            return invalid(format!(
                "nru sensing window {sensing_window} must be shorter than the sync slot"
            ));
        }
        if nru.min_sync_desync_us > nru.max_sync_desync_us {
            return invalid(format!(
                "nru.min_sync_desync_us {} exceeds nru.max_sync_desync_us {}",
                nru.min_sync_desync_us, nru.max_sync_desync_us
            ));
        }
        if nru.min_cw > nru.max_cw {
            return invalid(format!("nru.min_cw {} exceeds nru.max_cw {}", nru.min_cw, nru.max_cw));
        }
        if nru.retry_limit == 0 {
            return invalid("nru.retry_limit must be at least 1".into());
        }
        if nru.mode == NruMode::ReservationSignal && nru.mcot_us < nru.sync_slot_us {
            return invalid(format!(
                "rs mode needs nru.mcot_us ({}) of at least one sync slot ({})",
                nru.mcot_us, nru.sync_slot_us
            ));
        }

        let range = &self.dynamic_cw;
        if range.min_cw == 0 || range.min_cw > range.max_cw {
            return invalid(format!(
                "dynamic_cw range [{}, {}] must be non-empty and start at 1 or more",
                range.min_cw, range.max_cw
            ));
        }
        if range.step == 0 || range.calibration_duration_us == 0 || range.calibration_runs == 0 {
            return invalid("dynamic_cw step, calibration_duration_us and calibration_runs must be positive".into());
        }

        if self.time_horizon().is_none() {
            return invalid("simulation.duration_us plus wifi and nru timing overflows the simulation clock".into());
        }
        Ok(())
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<RunConfig, ModelError> {
    let yaml = std::fs::read_to_string(path)?;
    load_config_from_str(&yaml)
}

/// Parse and validate a YAML configuration.
pub fn load_config_from_str(yaml: &str) -> Result<RunConfig, ModelError> {
    let config: RunConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Simulation Building
// ============================================================================

/// A contender of a built run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationInfo {
    /// Node name (`wifi-0`, `gnb-0`, ...).
    pub name: String,
    /// Technology.
    pub technology: Technology,
    /// Entity ID of the station.
    pub entity_id: EntityId,
    /// Desynchronization offset of a gNB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desync_offset_us: Option<u64>,
}

/// Result of building one run from a configuration.
pub struct BuiltSimulation {
    /// Entity registry with all stations.
    pub entities: EntityRegistry,
    /// Start events, one per station at time zero.
    pub initial_events: Vec<Event>,
    /// Stations in entity ID order.
    pub stations: Vec<StationInfo>,
    /// Solver-sized Wi-Fi window, when dynamic sizing is selected.
    pub dynamic_cw: Option<u32>,
}

/// Build the stations of one run.
///
/// `dynamic_cw` is the already-sized Wi-Fi window; it is required when the
/// configuration selects dynamic sizing and ignored otherwise.
///
/// Desynchronization offsets come from a dedicated stream of the run seed,
/// so they do not shift when the stations' backoff draws change.
pub fn build_simulation(
    config: &RunConfig,
    seed: u64,
    dynamic_cw: Option<u32>,
) -> Result<BuiltSimulation, ModelError> {
    config.validate()?;

    let mut entities = EntityRegistry::new();
    let mut initial_events = Vec::new();
    let mut stations = Vec::new();
    let mut next_entity_id: u64 = 0;
    let mut event_id_counter: u64 = 0;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(1);

    let frame_airtime = config.wifi_frame_airtime()?;
    let dynamic_cw = if config.uses_dynamic_cw() {
        let cw = dynamic_cw.ok_or_else(|| {
            ModelError::InvalidConfig("dynamic contention window selected but not sized".into())
        })?;
        tracing::debug!(
            "Dynamic CW for {} wifi / {} nru: {}",
            config.nodes.wifi,
            config.nodes.nru,
            cw
        );
        Some(cw)
    } else {
        None
    };
    let wifi_cw = match dynamic_cw {
        Some(cw) => ContentionWindow::fixed(cw),
        None => ContentionWindow::new(config.wifi.min_cw, config.wifi.max_cw)?,
    };
    let sensing_window = nru_sensing_window(&config.nru)?;

    let mut start = |id: EntityId, initial_events: &mut Vec<Event>| {
        initial_events.push(Event {
            id: EventId(event_id_counter),
            time: SimTime::ZERO,
            source: id,
            targets: vec![id],
            payload: EventPayload::Timer { timer_id: TIMER_START },
        });
        event_id_counter += 1;
    };

    for i in 0..config.nodes.wifi {
        let id = EntityId::new(next_entity_id);
        next_entity_id += 1;
        let name = format!("wifi-{i}");

        let station = WifiStation::new(
            id,
            WifiStationConfig {
                name: name.clone(),
                frame_airtime,
                contention_window: wifi_cw,
                retry_limit: config.wifi.retry_limit,
                timing: WifiTiming::default(),
            },
        );
        entities.register(Box::new(station));
        start(id, &mut initial_events);
        stations.push(StationInfo {
            name,
            technology: Technology::Wifi,
            entity_id: id,
            desync_offset_us: None,
        });
    }

    let nru = &config.nru;
    for i in 0..config.nodes.nru {
        let id = EntityId::new(next_entity_id);
        next_entity_id += 1;
        let name = format!("gnb-{i}");

        let schedule = SyncSchedule::draw(
            SimTime::from_micros(nru.sync_slot_us),
            SimTime::from_micros(nru.min_sync_desync_us),
            SimTime::from_micros(nru.max_sync_desync_us),
            &mut rng,
        );
        tracing::debug!("{}: desync offset {}", name, schedule.offset());

        let station = NruBaseStation::new(
            id,
            NruConfig {
                name: name.clone(),
                mode: nru.mode,
                schedule,
                sensing_window,
                observation_slot: SimTime::from_micros(nru.observation_slot_us),
                contention_window: ContentionWindow::new(nru.min_cw, nru.max_cw)?,
                backoff_disabled: nru.backoff_disabled,
                retry_limit: nru.retry_limit,
                mcot: SimTime::from_micros(nru.mcot_us),
            },
        );
        entities.register(Box::new(station));
        start(id, &mut initial_events);
        stations.push(StationInfo {
            name,
            technology: Technology::Nru,
            entity_id: id,
            desync_offset_us: Some(schedule.offset().as_micros()),
        });
    }

    Ok(BuiltSimulation {
        entities,
        initial_events,
        stations,
        dynamic_cw,
    })
}

fn nru_sensing_window(nru: &NruParams) -> Result<SimTime, ModelError> {
    nru.sensing_window()
        .ok_or_else(|| ModelError::InvalidConfig("nru sensing window overflows".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_from_str("{}").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.nodes, NodeCounts { wifi: 1, nru: 1 });
        assert_eq!(config.nru.sensing_window(), Some(SimTime::from_micros(43)));
        assert_eq!(config.wifi_frame_airtime().unwrap(), SimTime::from_micros(248));
        assert!(!config.uses_dynamic_cw());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
simulation:
  duration_us: 50000
  seed: 9
  runs: 3
nodes:
  wifi: 4
  nru: 2
wifi:
  min_cw: 15
  max_cw: 1023
  mcs: 5
nru:
  mode: rs
  mcot_us: 8000
  backoff_disabled: true
dynamic_cw:
  strategy: calibration
  min_cw: 16
  max_cw: 256
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.simulation.runs, 3);
        assert_eq!(config.nodes.wifi, 4);
        assert_eq!(config.wifi.max_cw, 1023);
        assert_eq!(config.wifi.payload_bytes, 1472);
        assert_eq!(config.nru.mode, NruMode::ReservationSignal);
        assert!(config.nru.backoff_disabled);
        assert_eq!(config.dynamic_cw.strategy, CwStrategy::Calibration);
        assert_eq!(config.dynamic_cw.range(), CwSearchRange { min_cw: 16, max_cw: 256 });
        assert_eq!(config.dynamic_cw.step, 48);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = load_config_from_str("wifi:\n  min_window: 3\n");
        assert!(matches!(result, Err(ModelError::YamlError(_))));
    }

    #[test]
    fn test_invalid_configs_fail_fast() {
        let cases = [
            "wifi: {min_cw: 64, max_cw: 63}",
            "wifi: {mcs: 9}",
            "wifi: {retry_limit: 0}",
            "wifi: {payload_bytes: 0}",
            "simulation: {duration_us: 0}",
            "simulation: {runs: 0}",
            "nru: {min_sync_desync_us: 500, max_sync_desync_us: 100}",
            "nru: {observation_slots: 0}",
            "nru: {sync_slot_us: 40}",
            "nru: {mode: rs, mcot_us: 500}",
            "nru: {min_cw: 10, max_cw: 5}",
            "dynamic_cw: {min_cw: 0, max_cw: 10}",
            "dynamic_cw: {step: 0}",
            "dynamic_cw: {calibration_runs: 0}",
            "dynamic_cw: {strategy: oracle}",
        ];
        for yaml in cases {
            assert!(load_config_from_str(yaml).is_err(), "accepted: {yaml}");
        }
        assert!(matches!(
            load_config_from_str("wifi: {mcs: 9}"),
            Err(ModelError::Radio(RadioError::UnknownMcs(9)))
        ));
    }

    #[test]
    fn test_build_allocates_stations() {
        let mut config = RunConfig::default();
        config.nodes = NodeCounts { wifi: 3, nru: 2 };
        let built = build_simulation(&config, 42, None).unwrap();

        assert_eq!(built.entities.len(), 5);
        assert_eq!(built.initial_events.len(), 5);
        assert!(built.initial_events.iter().all(|e| e.time == SimTime::ZERO));
        let names: Vec<&str> = built.stations.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["wifi-0", "wifi-1", "wifi-2", "gnb-0", "gnb-1"]);
        assert!(built.stations[..3].iter().all(|s| s.desync_offset_us.is_none()));
        assert!(built.stations[3..]
            .iter()
            .all(|s| s.desync_offset_us.is_some_and(|o| o < 1000)));
        assert_eq!(built.dynamic_cw, None);
    }

    #[test]
    fn test_desync_offsets_follow_seed() {
        let mut config = RunConfig::default();
        config.nodes = NodeCounts { wifi: 0, nru: 4 };
        let offsets = |seed| -> Vec<Option<u64>> {
            build_simulation(&config, seed, None)
                .unwrap()
                .stations
                .iter()
                .map(|s| s.desync_offset_us)
                .collect()
        };
        assert_eq!(offsets(7), offsets(7));
        assert_ne!(offsets(7), offsets(8));
    }

    #[test]
    fn test_dynamic_cw_selected_by_zero_bounds() {
        let mut config = RunConfig::default();
        config.wifi.min_cw = 0;
        config.wifi.max_cw = 0;
        config.nodes = NodeCounts { wifi: 8, nru: 8 };
        let expected = SolverModel::for_frame(1472, 7)
            .unwrap()
            .solve(8, 8, CwSearchRange::default());
        assert_eq!(config.closed_form_cw().unwrap(), Some(expected));

        let built = build_simulation(&config, 1, Some(expected)).unwrap();
        assert_eq!(built.dynamic_cw, Some(expected));

        // The window has to be sized before building.
        assert!(matches!(
            build_simulation(&config, 1, None),
            Err(ModelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_explicit_window_ignores_sized_value() {
        let config = RunConfig::default();
        assert_eq!(config.closed_form_cw().unwrap(), None);
        let built = build_simulation(&config, 1, Some(100)).unwrap();
        assert_eq!(built.dynamic_cw, None);
    }

    #[test]
    fn test_overflowing_durations_are_config_errors() {
        let cases = [
            "nru: {prioritization_period_us: 18446744073709551615}",
            "nru: {observation_slot_us: 18446744073709551615, sync_slot_us: 18446744073709551615}",
            "nru: {observation_slot_us: 9223372036854775807, observation_slots: 4}",
            "simulation: {duration_us: 18446744073709551615}",
            "nru: {mcot_us: 18446744073709551615}",
            "nru: {max_sync_desync_us: 18446744073709551615}",
        ];
        for yaml in cases {
            let result = std::panic::catch_unwind(|| load_config_from_str(yaml));
            assert!(
                matches!(result, Ok(Err(ModelError::InvalidConfig(_)))),
                "not rejected as invalid: {yaml}"
            );
        }
    }
}
