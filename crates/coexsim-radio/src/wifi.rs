//! Wi-Fi DCF contender.
//!
//! The station is saturated: a new frame is queued as soon as the previous
//! one is delivered or dropped. Each frame goes through DIFS deferral and a
//! random backoff counted down under the busy-freeze rule, then occupies the
//! channel for its PPDU airtime.

use crate::backoff::{ContentionWindow, Countdown, CountdownStatus, RetryCounter, RetryVerdict};
use crate::{WifiTiming, TIMER_START};
use coexsim_common::metric_defs::{self, station_labels};
use coexsim_common::{
    Entity, EntityId, Event, EventPayload, Outcome, SimContext, SimError, SimTime, Technology,
    TransmissionRequest, TxHandle,
};
use metrics::Label;

const TIMER_BACKOFF: u64 = 1;

/// Per-station configuration, resolved by the model before the run starts.
#[derive(Debug, Clone)]
pub struct WifiStationConfig {
    /// Node name used in logs and metric labels.
    pub name: String,
    /// Airtime of one data frame.
    pub frame_airtime: SimTime,
    /// Contention window; fixed when sized by the dynamic solver.
    pub contention_window: ContentionWindow,
    /// Attempts per frame before it is dropped.
    pub retry_limit: u32,
    /// DCF timing.
    pub timing: WifiTiming,
}

/// Observable phase of a [`WifiStation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiPhase {
    /// Not started.
    Idle,
    /// Deferring or counting down backoff slots.
    Contending,
    /// A frame is on the air.
    Transmitting,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Contending(Countdown),
    Transmitting(TxHandle),
}

/// One saturated DCF contender.
pub struct WifiStation {
    id: EntityId,
    config: WifiStationConfig,
    cw: ContentionWindow,
    retry: RetryCounter,
    state: State,
    labels: Vec<Label>,
}

impl WifiStation {
    /// Create a station. It stays idle until it receives [`TIMER_START`].
    pub fn new(id: EntityId, config: WifiStationConfig) -> Self {
        let labels = station_labels(&config.name, Technology::Wifi);
        WifiStation {
            id,
            cw: config.contention_window,
            retry: RetryCounter::new(config.retry_limit),
            state: State::Idle,
            labels,
            config,
        }
    }

    /// Station configuration.
    pub fn config(&self) -> &WifiStationConfig {
        &self.config
    }

    /// Current contention window.
    pub fn contention_window(&self) -> &ContentionWindow {
        &self.cw
    }

    /// Failed attempts of the current frame.
    pub fn retry_count(&self) -> u32 {
        self.retry.count()
    }

    /// Current phase.
    pub fn phase(&self) -> WifiPhase {
        match self.state {
            State::Idle => WifiPhase::Idle,
            State::Contending(_) => WifiPhase::Contending,
            State::Transmitting(_) => WifiPhase::Transmitting,
        }
    }

    /// Start contending for a frame that becomes ready at `ready_at`.
    fn queue_frame(&mut self, ready_at: SimTime, ctx: &mut SimContext) -> Result<(), SimError> {
        let slots = self.cw.draw(ctx.rng());
        ctx.counters_mut().record_backoff_draw(Technology::Wifi, slots);
        metrics::histogram!(metric_defs::BACKOFF_SLOTS.name, self.labels.clone()).record(f64::from(slots));
        tracing::trace!(
            "{} drew {} slots (cw {}), ready at {}",
            self.config.name,
            slots,
            self.cw.current(),
            ready_at
        );

        let timing = self.config.timing;
        self.state = State::Contending(Countdown::after_ifs(ready_at, slots, timing.difs, timing.slot));
        self.resume_backoff(ctx)
    }

    fn resume_backoff(&mut self, ctx: &mut SimContext) -> Result<(), SimError> {
        let State::Contending(mut countdown) = self.state else {
            return Ok(());
        };
        match countdown.advance(ctx.medium(), ctx.time()) {
            CountdownStatus::Expired => self.transmit(ctx),
            CountdownStatus::WakeAt(at) => {
                self.state = State::Contending(countdown);
                ctx.schedule(self.id, at, EventPayload::Timer { timer_id: TIMER_BACKOFF })
            }
        }
    }

    fn transmit(&mut self, ctx: &mut SimContext) -> Result<(), SimError> {
        let now = ctx.time();
        let airtime = self.config.frame_airtime;
        let handle = ctx.medium_mut().begin_transmission(TransmissionRequest {
            owner: self.id,
            technology: Technology::Wifi,
            start: now,
            duration: airtime,
            payload_duration: airtime,
        })?;
        let end = now.checked_add(airtime).ok_or(SimError::TimeOverflow)?;
        ctx.schedule(self.id, end, EventPayload::TransmissionEnd { handle })?;

        ctx.counters_mut().wifi.attempts += 1;
        metrics::counter!(metric_defs::TX_ATTEMPTS.name, self.labels.clone()).increment(1);
        metrics::counter!(metric_defs::TX_AIRTIME.name, self.labels.clone()).increment(airtime.as_micros());
        tracing::trace!("{} transmitting [{}, {})", self.config.name, now, end);

        self.state = State::Transmitting(handle);
        Ok(())
    }

    fn on_transmission_end(&mut self, handle: TxHandle, ctx: &mut SimContext) -> Result<(), SimError> {
        let now = ctx.time();
        let record = ctx.medium_mut().complete_transmission(handle, now)?;
        let timing = self.config.timing;

        let next_ready = match record.outcome {
            Outcome::Success => {
                self.cw.reset();
                self.retry.reset();
                ctx.counters_mut().wifi.frames_delivered += 1;
                tracing::debug!("{} frame delivered at {}", self.config.name, now);
                now + timing.ack_exchange
            }
            Outcome::Collision => {
                metrics::counter!(metric_defs::TX_COLLISIONS.name, self.labels.clone()).increment(1);
                match self.retry.record_failure() {
                    RetryVerdict::Retry => {
                        self.cw.double();
                        tracing::debug!(
                            "{} collision at {}, retry {} with cw {}",
                            self.config.name,
                            now,
                            self.retry.count(),
                            self.cw.current()
                        );
                    }
                    RetryVerdict::Exhausted => {
                        self.cw.reset();
                        ctx.counters_mut().wifi.frames_dropped += 1;
                        metrics::counter!(metric_defs::FRAMES_DROPPED.name, self.labels.clone()).increment(1);
                        tracing::debug!("{} frame dropped at {} after {} attempts", self.config.name, now, self.retry.limit());
                    }
                }
                now + timing.ack_timeout
            }
        };
        self.queue_frame(next_ready, ctx)
    }
}

impl Entity for WifiStation {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::Timer { timer_id: TIMER_START } => {
                if matches!(self.state, State::Idle) {
                    self.queue_frame(ctx.time(), ctx)?;
                }
            }
            EventPayload::Timer { timer_id: TIMER_BACKOFF } => self.resume_backoff(ctx)?,
            EventPayload::TransmissionEnd { handle } => match self.state {
                State::Transmitting(current) if current == *handle => {
                    self.on_transmission_end(*handle, ctx)?;
                }
                _ => {
                    return Err(SimError::HandlerError {
                        entity: self.id,
                        message: format!("unexpected end of {:?}", handle),
                    });
                }
            },
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::run;

    fn station(id: u64, cw: ContentionWindow, retry_limit: u32) -> Box<dyn Entity> {
        Box::new(WifiStation::new(
            EntityId(id),
            WifiStationConfig {
                name: format!("wifi-{id}"),
                frame_airtime: SimTime::from_micros(248),
                contention_window: cw,
                retry_limit,
                timing: WifiTiming::default(),
            },
        ))
    }

    #[test]
    fn test_new_station_is_idle() {
        let s = WifiStation::new(
            EntityId(1),
            WifiStationConfig {
                name: "wifi-1".into(),
                frame_airtime: SimTime::from_micros(248),
                contention_window: ContentionWindow::new(15, 63).unwrap(),
                retry_limit: 7,
                timing: WifiTiming::default(),
            },
        );
        assert_eq!(s.phase(), WifiPhase::Idle);
        assert_eq!(s.contention_window().current(), 15);
        assert_eq!(s.retry_count(), 0);
    }

    #[test]
    fn test_lone_station_never_collides() {
        let ctx = run(vec![station(1, ContentionWindow::fixed(15), 3)], SimTime::from_micros(10_000));
        let (medium, counters) = ctx.into_parts();
        let records = medium.records();

        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.is_success()));
        assert_eq!(counters.wifi.frames_delivered, records.len() as u64);
        assert_eq!(counters.wifi.frames_dropped, 0);

        // DIFS plus a whole number of slots before the first frame.
        let first = records[0].start.as_micros();
        assert!(first >= 43 && first <= 43 + 15 * 9);
        assert_eq!((first - 43) % 9, 0);

        // ACK exchange, DIFS and backoff between consecutive frames.
        for pair in records.windows(2) {
            let gap = (pair[1].start - pair[0].end()).as_micros();
            assert!(gap >= 44 + 43 && gap <= 44 + 43 + 15 * 9, "gap {gap}");
            assert_eq!((gap - 44 - 43) % 9, 0);
        }
    }

    #[test]
    fn test_synchronized_stations_drop_after_retry_limit() {
        // Zero-width windows: both stations always pick the same slot.
        let ctx = run(
            vec![station(1, ContentionWindow::fixed(0), 3), station(2, ContentionWindow::fixed(0), 3)],
            SimTime::from_micros(1200),
        );
        let (medium, counters) = ctx.into_parts();

        // Attempts start at 43, 379, 715 and 1051; the last is still in flight.
        assert_eq!(medium.records().len(), 6);
        assert!(medium.records().iter().all(|r| !r.is_success()));
        assert_eq!(medium.in_flight(), 2);
        assert_eq!(counters.wifi.attempts, 8);
        assert_eq!(counters.wifi.frames_dropped, 2);
        assert_eq!(counters.wifi.frames_delivered, 0);
    }

    #[test]
    fn test_backoff_draws_are_counted() {
        let ctx = run(vec![station(1, ContentionWindow::new(15, 63).unwrap(), 7)], SimTime::from_micros(5_000));
        let draws: u64 = ctx.counters().wifi.backoff_draws.values().sum();
        // One draw per attempt, plus one if the station is still contending.
        let attempts = ctx.counters().wifi.attempts;
        assert!(draws == attempts || draws == attempts + 1, "{draws} draws, {attempts} attempts");
        assert!(ctx.counters().wifi.backoff_draws.keys().all(|&slots| slots <= 15));
    }
}
