//! # coexsim-common
//!
//! Common types and traits for the coexistence simulation engine.
//!
//! This crate provides core simulation primitives including:
//! - Time representation ([`SimTime`])
//! - Entity identification ([`EntityId`]) and technology tags ([`Technology`])
//! - Event system ([`Event`], [`EventPayload`])
//! - Simulation context ([`SimContext`]) owning the run's RNG and channel
//! - Entity traits ([`Entity`])
//! - The shared channel ([`WirelessMedium`])
//! - Metric definitions ([`metric_defs`])

pub mod medium;
pub mod metric_defs;

pub use medium::{
    BusyPeriod, Outcome, TransmissionRecord, TransmissionRequest, TxHandle, WirelessMedium,
};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Simulation errors.
///
/// Every variant indicates a broken invariant inside the engine. Collisions,
/// dropped frames and aborted listen-before-talk attempts are not errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Entity not found.
    #[error("Entity not found: {0:?}")]
    EntityNotFound(EntityId),

    /// Simulation time overflow.
    #[error("Simulation time overflow")]
    TimeOverflow,

    /// An event was scheduled or popped before the current virtual time.
    #[error("Time went backwards: now {now}, requested {requested}")]
    TimeWentBackwards {
        /// Current virtual time.
        now: SimTime,
        /// Offending timestamp.
        requested: SimTime,
    },

    /// The medium was handed a malformed transmission.
    #[error("Invalid transmission: {0}")]
    InvalidTransmission(String),

    /// The medium does not know the handle.
    #[error("Unknown transmission handle: {0:?}")]
    UnknownTransmission(TxHandle),

    /// Event handler error.
    #[error("Event handler error in entity {entity:?}: {message}")]
    HandlerError {
        /// Entity that had the error.
        entity: EntityId,
        /// Error message.
        message: String,
    },
}

// ============================================================================
// Time Types
// ============================================================================

/// Simulation time in microseconds since simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Zero time.
    pub const ZERO: SimTime = SimTime(0);

    /// Create from microseconds.
    pub const fn from_micros(us: u64) -> Self {
        SimTime(us)
    }

    /// Get as microseconds.
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Add duration to time.
    pub fn checked_add(&self, duration: SimTime) -> Option<SimTime> {
        self.0.checked_add(duration.0).map(SimTime)
    }

    /// Subtract duration from time.
    pub fn checked_sub(&self, duration: SimTime) -> Option<SimTime> {
        self.0.checked_sub(duration.0).map(SimTime)
    }

    /// Multiply a duration by a whole count (e.g. a number of slots).
    pub fn times(&self, count: u32) -> SimTime {
        SimTime(self.0 * u64::from(count))
    }

    /// Multiply a duration by a whole count, `None` on overflow.
    pub fn checked_times(&self, count: u32) -> Option<SimTime> {
        self.0.checked_mul(u64::from(count)).map(SimTime)
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.0)
    }
}

// ============================================================================
// Entity Types
// ============================================================================

/// Unique identifier for an entity in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create a new entity ID.
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }
}

/// Radio access technology of a contender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technology {
    /// IEEE 802.11 DCF station.
    Wifi,
    /// 5G NR-U base station (gNB).
    Nru,
}

impl Technology {
    /// Label used in metrics and reports.
    pub fn as_label(&self) -> &'static str {
        match self {
            Technology::Wifi => "wifi",
            Technology::Nru => "nru",
        }
    }
}

impl std::fmt::Display for Technology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// A simulation event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event ID. Also the tie-break for equal times (insertion order).
    pub id: EventId,
    /// Time when the event occurs.
    pub time: SimTime,
    /// Entity that created the event.
    pub source: EntityId,
    /// Target entities for the event.
    pub targets: Vec<EntityId>,
    /// Event payload.
    pub payload: EventPayload,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest time first)
        other.time.cmp(&self.time).then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// Event payload variants.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// A delayed callback.
    Timer {
        /// Entity-defined timer ID.
        timer_id: u64,
    },

    /// A transmission registered with the medium has reached its end time.
    TransmissionEnd {
        /// Handle returned by [`WirelessMedium::begin_transmission`].
        handle: TxHandle,
    },

    /// End the simulation.
    SimulationEnd,
}

// ============================================================================
// Access Counters
// ============================================================================

/// Expected protocol outcomes for one technology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnologyCounters {
    /// Transmissions handed to the medium.
    pub attempts: u64,
    /// Frames (Wi-Fi) or bursts (NR-U) that completed without collision.
    pub frames_delivered: u64,
    /// Frames or bursts abandoned after exhausting the retry limit.
    pub frames_dropped: u64,
    /// Listen-before-talk attempts aborted because the channel was busy.
    pub lbt_aborts: u64,
    /// Histogram of backoff draws (slot count -> occurrences).
    pub backoff_draws: BTreeMap<u32, u64>,
}

/// Per-run tallies of normal simulation outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCounters {
    /// Wi-Fi stations.
    pub wifi: TechnologyCounters,
    /// NR-U base stations.
    pub nru: TechnologyCounters,
}

impl AccessCounters {
    /// Counters for one technology.
    pub fn get(&self, technology: Technology) -> &TechnologyCounters {
        match technology {
            Technology::Wifi => &self.wifi,
            Technology::Nru => &self.nru,
        }
    }

    /// Mutable counters for one technology.
    pub fn get_mut(&mut self, technology: Technology) -> &mut TechnologyCounters {
        match technology {
            Technology::Wifi => &mut self.wifi,
            Technology::Nru => &mut self.nru,
        }
    }

    /// Record one backoff draw.
    pub fn record_backoff_draw(&mut self, technology: Technology, slots: u32) {
        *self.get_mut(technology).backoff_draws.entry(slots).or_insert(0) += 1;
    }
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Context passed to entities during event handling.
///
/// Owns everything a run mutates besides the entities themselves: the seeded
/// generator, the shared channel and the outcome counters. One context belongs
/// to exactly one run, so independent runs share nothing.
pub struct SimContext {
    time: SimTime,
    rng: ChaCha8Rng,
    pending_events: Vec<Event>,
    next_event_id: u64,
    source_entity: EntityId,
    medium: WirelessMedium,
    counters: AccessCounters,
}

impl SimContext {
    /// Create a new simulation context.
    pub fn new(seed: u64) -> Self {
        SimContext {
            time: SimTime::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_events: Vec::new(),
            next_event_id: 0,
            source_entity: EntityId(0),
            medium: WirelessMedium::new(),
            counters: AccessCounters::default(),
        }
    }

    /// Get the current simulation time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Get mutable access to the random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Set the current time (used by event loop).
    pub fn set_time(&mut self, time: SimTime) {
        self.time = time;
    }

    /// Set the source entity (used by event loop).
    pub fn set_source(&mut self, entity: EntityId) {
        self.source_entity = entity;
    }

    /// The shared channel.
    pub fn medium(&self) -> &WirelessMedium {
        &self.medium
    }

    /// Mutable access to the shared channel.
    pub fn medium_mut(&mut self) -> &mut WirelessMedium {
        &mut self.medium
    }

    /// Outcome counters for this run.
    pub fn counters(&self) -> &AccessCounters {
        &self.counters
    }

    /// Mutable outcome counters for this run.
    pub fn counters_mut(&mut self) -> &mut AccessCounters {
        &mut self.counters
    }

    /// Schedule a resumption of `entity` at absolute time `at`.
    pub fn schedule(&mut self, entity: EntityId, at: SimTime, payload: EventPayload) -> Result<(), SimError> {
        if at < self.time {
            return Err(SimError::TimeWentBackwards {
                now: self.time,
                requested: at,
            });
        }
        let event = Event {
            id: EventId(self.next_event_id),
            time: at,
            source: self.source_entity,
            targets: vec![entity],
            payload,
        };
        self.next_event_id += 1;
        self.pending_events.push(event);
        Ok(())
    }

    /// Take all pending events (used by event loop).
    pub fn take_pending_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// Get the next event ID (used by event loop for external event creation).
    pub fn next_event_id(&mut self) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }

    /// Consume the context, returning the run's channel and counters.
    pub fn into_parts(self) -> (WirelessMedium, AccessCounters) {
        (self.medium, self.counters)
    }
}

// ============================================================================
// Entity Trait
// ============================================================================

/// Base trait for all simulation entities.
pub trait Entity: Send {
    /// Get the entity's unique ID.
    fn entity_id(&self) -> EntityId;

    /// Handle an event.
    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError>;
}

// ============================================================================
// Entity Registry
// ============================================================================

/// Registry for managing simulation entities.
pub struct EntityRegistry {
    entities: HashMap<EntityId, Box<dyn Entity>>,
}

impl EntityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        EntityRegistry {
            entities: HashMap::new(),
        }
    }

    /// Register an entity.
    pub fn register(&mut self, entity: Box<dyn Entity>) {
        let id = entity.entity_id();
        self.entities.insert(id, entity);
    }

    /// Dispatch an event to its target entities.
    pub fn dispatch_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        for target in &event.targets {
            if let Some(entity) = self.entities.get_mut(target) {
                ctx.set_source(*target);
                entity.handle_event(event, ctx)?;
            } else {
                tracing::error!("EntityNotFound {:?} when dispatching {:?}", target, event.payload);
                return Err(SimError::EntityNotFound(*target));
            }
        }
        Ok(())
    }

    /// Get the number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::BinaryHeap;

    #[test]
    fn test_sim_time_arithmetic() {
        let t1 = SimTime::from_micros(100);
        let t2 = SimTime::from_micros(43);
        assert_eq!((t1 + t2).as_micros(), 143);
        assert_eq!((t1 - t2).as_micros(), 57);
        assert_eq!(t2 - t1, SimTime::ZERO);
        assert_eq!(t2.checked_sub(t1), None);
        assert_eq!(SimTime::from_micros(9).times(7), SimTime::from_micros(63));
    }

    #[test]
    fn test_sim_time_checked_arithmetic() {
        let max = SimTime::from_micros(u64::MAX);
        assert_eq!(max.checked_add(SimTime::from_micros(1)), None);
        assert_eq!(max.checked_times(2), None);
        assert_eq!(
            SimTime::from_micros(9).checked_times(3),
            Some(SimTime::from_micros(27))
        );
        assert_eq!(max.checked_times(1), Some(max));
    }

    #[test]
    fn test_event_heap_orders_by_time_then_insertion() {
        let event = |id: u64, time: u64| Event {
            id: EventId(id),
            time: SimTime::from_micros(time),
            source: EntityId(0),
            targets: vec![],
            payload: EventPayload::Timer { timer_id: id },
        };

        let mut heap = BinaryHeap::new();
        heap.push(event(3, 50));
        heap.push(event(0, 100));
        heap.push(event(2, 50));
        heap.push(event(1, 10));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|e| e.id.0).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_schedule_rejects_past_time() {
        let mut ctx = SimContext::new(1);
        ctx.set_time(SimTime::from_micros(500));

        let result = ctx.schedule(EntityId(1), SimTime::from_micros(499), EventPayload::Timer { timer_id: 0 });
        assert!(matches!(result, Err(SimError::TimeWentBackwards { .. })));

        ctx.schedule(EntityId(1), SimTime::from_micros(500), EventPayload::Timer { timer_id: 0 })
            .unwrap();
        let pending = ctx.take_pending_events();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].time, SimTime::from_micros(500));
    }

    #[test]
    fn test_context_rng_is_seeded() {
        let mut a = SimContext::new(42);
        let mut b = SimContext::new(42);
        let xs: Vec<u32> = (0..8).map(|_| a.rng().gen_range(0..=1023)).collect();
        let ys: Vec<u32> = (0..8).map(|_| b.rng().gen_range(0..=1023)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_backoff_histogram() {
        let mut counters = AccessCounters::default();
        counters.record_backoff_draw(Technology::Wifi, 3);
        counters.record_backoff_draw(Technology::Wifi, 3);
        counters.record_backoff_draw(Technology::Nru, 0);
        assert_eq!(counters.wifi.backoff_draws.get(&3), Some(&2));
        assert_eq!(counters.get(Technology::Nru).backoff_draws.get(&0), Some(&1));
    }
}
