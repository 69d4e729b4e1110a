//! NR-U listen-before-talk contender.
//!
//! A base station only attempts access at its synchronization boundaries. At
//! each boundary it senses the channel for the sensing window
//! (prioritization period plus observation slots); a busy slot aborts the
//! attempt until the next boundary. A clean sense is followed, in Gap mode,
//! by a backoff under the busy-freeze rule, then by a burst bounded by MCOT.
//! After the burst the station stays silent until its next boundary.

use crate::backoff::{ContentionWindow, Countdown, CountdownStatus, RetryCounter, RetryVerdict};
use crate::TIMER_START;
use coexsim_common::metric_defs::{self, station_labels};
use coexsim_common::{
    Entity, EntityId, Event, EventPayload, Outcome, SimContext, SimError, SimTime, Technology,
    TransmissionRequest, TxHandle,
};
use metrics::Label;
use rand::Rng;
use serde::{Deserialize, Serialize};

const TIMER_BOUNDARY: u64 = 1;
const TIMER_SENSE_END: u64 = 2;
const TIMER_BACKOFF: u64 = 3;

// ============================================================================
// Mode
// ============================================================================

/// Channel access variant of a base station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NruMode {
    /// Sense a gap, back off, then transmit payload for the whole MCOT.
    #[default]
    Gap,
    /// Transmit right after sensing; a reservation signal holds the channel
    /// up to the next boundary, payload follows.
    #[serde(rename = "rs")]
    ReservationSignal,
}

/// Channel occupancy of one burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Burst {
    /// Total time on the channel.
    pub duration: SimTime,
    /// Part of `duration` carrying payload.
    pub payload: SimTime,
}

impl Burst {
    /// Time spent on the reservation signal.
    pub fn reservation(&self) -> SimTime {
        self.duration - self.payload
    }
}

impl NruMode {
    /// Whether a clean sense is followed by a random backoff.
    pub fn uses_backoff(&self) -> bool {
        matches!(self, NruMode::Gap)
    }

    /// Burst started at `now`.
    pub fn build_burst(&self, now: SimTime, schedule: &SyncSchedule, mcot: SimTime) -> Burst {
        match self {
            NruMode::Gap => Burst {
                duration: mcot,
                payload: mcot,
            },
            NruMode::ReservationSignal => {
                let reservation = schedule.next_boundary_at_or_after(now) - now;
                Burst {
                    duration: mcot,
                    payload: mcot - reservation,
                }
            }
        }
    }
}

impl std::fmt::Display for NruMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NruMode::Gap => f.write_str("gap"),
            NruMode::ReservationSignal => f.write_str("rs"),
        }
    }
}

// ============================================================================
// Synchronization Schedule
// ============================================================================

/// Periodic boundaries `offset + k * slot`, `k >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncSchedule {
    slot: SimTime,
    offset: SimTime,
}

impl SyncSchedule {
    /// Schedule with a known offset.
    pub fn new(slot: SimTime, offset: SimTime) -> Self {
        SyncSchedule { slot, offset }
    }

    /// Schedule with an offset drawn uniformly from `[min, max)`; `min` if the
    /// range is empty.
    pub fn draw<R: Rng + ?Sized>(slot: SimTime, min: SimTime, max: SimTime, rng: &mut R) -> Self {
        let offset = if max <= min {
            min
        } else {
            SimTime::from_micros(rng.gen_range(min.as_micros()..max.as_micros()))
        };
        Self::new(slot, offset)
    }

    /// Slot duration.
    pub fn slot(&self) -> SimTime {
        self.slot
    }

    /// Desynchronization offset.
    pub fn offset(&self) -> SimTime {
        self.offset
    }

    /// First boundary at or after `time`.
    pub fn next_boundary_at_or_after(&self, time: SimTime) -> SimTime {
        if time <= self.offset {
            return self.offset;
        }
        let slot = self.slot.as_micros().max(1);
        let k = (time - self.offset).as_micros().div_ceil(slot);
        self.offset + SimTime::from_micros(k * slot)
    }

    /// First boundary strictly after `time`.
    pub fn next_boundary_after(&self, time: SimTime) -> SimTime {
        self.next_boundary_at_or_after(time + SimTime::from_micros(1))
    }
}

// ============================================================================
// Base Station Entity
// ============================================================================

/// Per-station configuration, resolved by the model before the run starts.
#[derive(Debug, Clone)]
pub struct NruConfig {
    /// Node name used in logs and metric labels.
    pub name: String,
    /// Gap or reservation-signal access.
    pub mode: NruMode,
    /// Boundaries at which access may be attempted.
    pub schedule: SyncSchedule,
    /// Prioritization period plus all observation slots.
    pub sensing_window: SimTime,
    /// Backoff slot.
    pub observation_slot: SimTime,
    /// Contention window for Gap-mode backoff.
    pub contention_window: ContentionWindow,
    /// Skip the backoff after a clean sense.
    pub backoff_disabled: bool,
    /// Consecutive collisions before a burst is counted as dropped.
    pub retry_limit: u32,
    /// Maximum channel occupancy time of one burst.
    pub mcot: SimTime,
}

/// Observable phase of an [`NruBaseStation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NruPhase {
    /// Not started.
    Idle,
    /// Silent until the next synchronization boundary.
    WaitSync,
    /// Sensing the channel after a boundary.
    Sensing,
    /// Counting down backoff slots.
    Backoff,
    /// A burst is on the air.
    Transmitting,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    WaitSync,
    Sensing { boundary: SimTime },
    Backoff(Countdown),
    Transmitting(TxHandle),
}

/// One NR-U gNB.
pub struct NruBaseStation {
    id: EntityId,
    config: NruConfig,
    cw: ContentionWindow,
    retry: RetryCounter,
    state: State,
    labels: Vec<Label>,
}

impl NruBaseStation {
    /// Create a base station. It stays idle until it receives [`TIMER_START`].
    pub fn new(id: EntityId, config: NruConfig) -> Self {
        let labels = station_labels(&config.name, Technology::Nru);
        NruBaseStation {
            id,
            cw: config.contention_window,
            retry: RetryCounter::new(config.retry_limit),
            state: State::Idle,
            labels,
            config,
        }
    }

    /// Station configuration.
    pub fn config(&self) -> &NruConfig {
        &self.config
    }

    /// Current contention window.
    pub fn contention_window(&self) -> &ContentionWindow {
        &self.cw
    }

    /// Current phase.
    pub fn phase(&self) -> NruPhase {
        match self.state {
            State::Idle => NruPhase::Idle,
            State::WaitSync => NruPhase::WaitSync,
            State::Sensing { .. } => NruPhase::Sensing,
            State::Backoff(_) => NruPhase::Backoff,
            State::Transmitting(_) => NruPhase::Transmitting,
        }
    }

    fn wait_for_boundary(&mut self, boundary: SimTime, ctx: &mut SimContext) -> Result<(), SimError> {
        tracing::trace!("{} waiting for boundary {}", self.config.name, boundary);
        self.state = State::WaitSync;
        ctx.schedule(self.id, boundary, EventPayload::Timer { timer_id: TIMER_BOUNDARY })
    }

    fn on_boundary(&mut self, ctx: &mut SimContext) -> Result<(), SimError> {
        let now = ctx.time();
        if !ctx.medium().is_idle_at(now) {
            return self.abort(ctx);
        }
        let end = now.checked_add(self.config.sensing_window).ok_or(SimError::TimeOverflow)?;
        self.state = State::Sensing { boundary: now };
        ctx.schedule(self.id, end, EventPayload::Timer { timer_id: TIMER_SENSE_END })
    }

    fn on_sense_end(&mut self, boundary: SimTime, ctx: &mut SimContext) -> Result<(), SimError> {
        let now = ctx.time();
        if !ctx.medium().is_idle_during(boundary, now) {
            return self.abort(ctx);
        }
        if !self.config.mode.uses_backoff() || self.config.backoff_disabled {
            return self.transmit(ctx);
        }

        let slots = self.cw.draw(ctx.rng());
        ctx.counters_mut().record_backoff_draw(Technology::Nru, slots);
        metrics::histogram!(metric_defs::BACKOFF_SLOTS.name, self.labels.clone()).record(f64::from(slots));
        tracing::trace!("{} sensed idle, backing off {} slots", self.config.name, slots);

        self.state = State::Backoff(Countdown::immediate(
            now,
            slots,
            self.config.sensing_window,
            self.config.observation_slot,
        ));
        self.resume_backoff(ctx)
    }

    fn resume_backoff(&mut self, ctx: &mut SimContext) -> Result<(), SimError> {
        let State::Backoff(mut countdown) = self.state else {
            return Ok(());
        };
        match countdown.advance(ctx.medium(), ctx.time()) {
            CountdownStatus::Expired => self.transmit(ctx),
            CountdownStatus::WakeAt(at) => {
                self.state = State::Backoff(countdown);
                ctx.schedule(self.id, at, EventPayload::Timer { timer_id: TIMER_BACKOFF })
            }
        }
    }

    fn abort(&mut self, ctx: &mut SimContext) -> Result<(), SimError> {
        let now = ctx.time();
        ctx.counters_mut().nru.lbt_aborts += 1;
        metrics::counter!(metric_defs::LBT_ABORTS.name, self.labels.clone()).increment(1);
        tracing::trace!("{} channel busy at {}, attempt aborted", self.config.name, now);
        let next = self.config.schedule.next_boundary_after(now);
        self.wait_for_boundary(next, ctx)
    }

    fn transmit(&mut self, ctx: &mut SimContext) -> Result<(), SimError> {
        let now = ctx.time();
        let burst = self.config.mode.build_burst(now, &self.config.schedule, self.config.mcot);
        let handle = ctx.medium_mut().begin_transmission(TransmissionRequest {
            owner: self.id,
            technology: Technology::Nru,
            start: now,
            duration: burst.duration,
            payload_duration: burst.payload,
        })?;
        let end = now.checked_add(burst.duration).ok_or(SimError::TimeOverflow)?;
        ctx.schedule(self.id, end, EventPayload::TransmissionEnd { handle })?;

        ctx.counters_mut().nru.attempts += 1;
        metrics::counter!(metric_defs::TX_ATTEMPTS.name, self.labels.clone()).increment(1);
        metrics::counter!(metric_defs::TX_AIRTIME.name, self.labels.clone()).increment(burst.duration.as_micros());
        if burst.reservation() > SimTime::ZERO {
            metrics::counter!(metric_defs::RESERVATION_AIRTIME.name, self.labels.clone())
                .increment(burst.reservation().as_micros());
        }
        tracing::trace!(
            "{} burst [{}, {}), reservation {}",
            self.config.name,
            now,
            end,
            burst.reservation()
        );

        self.state = State::Transmitting(handle);
        Ok(())
    }

    fn on_transmission_end(&mut self, handle: TxHandle, ctx: &mut SimContext) -> Result<(), SimError> {
        let now = ctx.time();
        let record = ctx.medium_mut().complete_transmission(handle, now)?;
        match record.outcome {
            Outcome::Success => {
                self.cw.reset();
                self.retry.reset();
                ctx.counters_mut().nru.frames_delivered += 1;
                tracing::debug!("{} burst delivered at {}", self.config.name, now);
            }
            Outcome::Collision => {
                metrics::counter!(metric_defs::TX_COLLISIONS.name, self.labels.clone()).increment(1);
                match self.retry.record_failure() {
                    RetryVerdict::Retry => {
                        self.cw.double();
                        tracing::debug!("{} burst collided at {}, cw {}", self.config.name, now, self.cw.current());
                    }
                    RetryVerdict::Exhausted => {
                        self.cw.reset();
                        ctx.counters_mut().nru.frames_dropped += 1;
                        metrics::counter!(metric_defs::FRAMES_DROPPED.name, self.labels.clone()).increment(1);
                        tracing::debug!("{} burst dropped at {}", self.config.name, now);
                    }
                }
            }
        }
        let next = self.config.schedule.next_boundary_at_or_after(now);
        self.wait_for_boundary(next, ctx)
    }
}

impl Entity for NruBaseStation {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match (&event.payload, self.state) {
            (EventPayload::Timer { timer_id: TIMER_START }, State::Idle) => {
                let first = self.config.schedule.next_boundary_at_or_after(ctx.time());
                self.wait_for_boundary(first, ctx)?;
            }
            (EventPayload::Timer { timer_id: TIMER_BOUNDARY }, State::WaitSync) => self.on_boundary(ctx)?,
            (EventPayload::Timer { timer_id: TIMER_SENSE_END }, State::Sensing { boundary }) => {
                self.on_sense_end(boundary, ctx)?;
            }
            (EventPayload::Timer { timer_id: TIMER_BACKOFF }, State::Backoff(_)) => self.resume_backoff(ctx)?,
            (EventPayload::TransmissionEnd { handle }, State::Transmitting(current)) if current == *handle => {
                self.on_transmission_end(*handle, ctx)?;
            }
            (EventPayload::SimulationEnd, _) => {}
            (payload, _) => {
                return Err(SimError::HandlerError {
                    entity: self.id,
                    message: format!("{:?} not expected in phase {:?}", payload, self.phase()),
                });
            }
        }
        Ok(())
    }
}
