//! The shared wireless channel.
//!
//! Stations register transmission intervals with the [`WirelessMedium`] and sense
//! the channel through its busy timeline. Intervals are half-open `[start, end)`:
//! two intervals that merely touch do not overlap, and a channel is idle at the
//! instant a transmission ends.
//!
//! Outcomes are resolved exactly once per interval, when it completes. Every
//! transmission begins at the current virtual time, so by the time an interval
//! completes all intervals that could overlap it have already begun and marked
//! the overlap.

use crate::{EntityId, SimError, SimTime, Technology};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// Handle to an in-flight transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle(pub u64);

/// Resolved outcome of a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// No other interval overlapped this one.
    Success,
    /// At least one other interval overlapped this one.
    Collision,
}

/// A transmission a station asks the medium to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmissionRequest {
    /// Transmitting entity.
    pub owner: EntityId,
    /// Technology of the transmitter.
    pub technology: Technology,
    /// Start of the interval; must not precede the medium's current time.
    pub start: SimTime,
    /// Total time the channel is occupied.
    pub duration: SimTime,
    /// Part of `duration` that carries payload.
    pub payload_duration: SimTime,
}

/// Finalized entry of the per-run record log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionRecord {
    /// Transmitting entity.
    pub owner: EntityId,
    /// Technology of the transmitter.
    pub technology: Technology,
    /// Start of the interval.
    pub start: SimTime,
    /// Total occupied time.
    pub duration: SimTime,
    /// Time spent carrying payload.
    pub payload_duration: SimTime,
    /// Success or collision.
    pub outcome: Outcome,
}

impl TransmissionRecord {
    /// End of the interval (exclusive).
    pub fn end(&self) -> SimTime {
        self.start + self.duration
    }

    /// Whether the transmission was delivered.
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// A maximal stretch of time during which the channel was, or will be, busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyPeriod {
    /// First busy instant.
    pub start: SimTime,
    /// First idle instant after `start`.
    pub end: SimTime,
}

#[derive(Debug)]
struct ActiveTransmission {
    handle: TxHandle,
    request: TransmissionRequest,
    end: SimTime,
    collided: bool,
}

// ============================================================================
// Wireless Medium
// ============================================================================

/// Single logical channel shared by every contender of a run.
#[derive(Debug, Default)]
pub struct WirelessMedium {
    /// Latest time the medium has been told about.
    now: SimTime,
    active: Vec<ActiveTransmission>,
    /// Union of all intervals seen so far, sorted and disjoint.
    busy: Vec<BusyPeriod>,
    records: Vec<TransmissionRecord>,
    next_handle: u64,
}

impl WirelessMedium {
    /// Create an idle medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff no transmission interval covers `time`.
    pub fn is_idle_at(&self, time: SimTime) -> bool {
        self.busy_period_at(time).is_none()
    }

    /// True iff no transmission interval intersects `[from, to)`.
    pub fn is_idle_during(&self, from: SimTime, to: SimTime) -> bool {
        self.is_idle_at(from)
            && self
                .next_busy_start_after(from)
                .map_or(true, |start| start >= to)
    }

    /// The busy period covering `time`, if any.
    pub fn busy_period_at(&self, time: SimTime) -> Option<BusyPeriod> {
        let idx = self.busy.partition_point(|p| p.start <= time);
        let period = *self.busy.get(idx.checked_sub(1)?)?;
        (time < period.end).then_some(period)
    }

    /// Start of the first busy period beginning strictly after `time`.
    pub fn next_busy_start_after(&self, time: SimTime) -> Option<SimTime> {
        let idx = self.busy.partition_point(|p| p.start <= time);
        self.busy.get(idx).map(|p| p.start)
    }

    /// Register a new transmission interval.
    ///
    /// Any active interval still open at `request.start` overlaps the new one and
    /// both are marked collided.
    pub fn begin_transmission(&mut self, request: TransmissionRequest) -> Result<TxHandle, SimError> {
        if request.start < self.now {
            return Err(SimError::InvalidTransmission(format!(
                "{:?} starts at {} before medium time {}",
                request.owner, request.start, self.now
            )));
        }
        if request.duration == SimTime::ZERO {
            return Err(SimError::InvalidTransmission(format!(
                "{:?} requested a zero-length transmission",
                request.owner
            )));
        }
        if request.payload_duration > request.duration {
            return Err(SimError::InvalidTransmission(format!(
                "{:?} payload {} exceeds duration {}",
                request.owner, request.payload_duration, request.duration
            )));
        }
        let end = request
            .start
            .checked_add(request.duration)
            .ok_or(SimError::TimeOverflow)?;

        self.now = request.start;

        let mut collided = false;
        for other in self.active.iter_mut().filter(|a| a.end > request.start) {
            other.collided = true;
            collided = true;
        }

        match self.busy.last_mut() {
            Some(last) if request.start <= last.end => last.end = last.end.max(end),
            _ => self.busy.push(BusyPeriod { start: request.start, end }),
        }

        let handle = TxHandle(self.next_handle);
        self.next_handle += 1;
        self.active.push(ActiveTransmission {
            handle,
            request,
            end,
            collided,
        });
        Ok(handle)
    }

    /// Finalize a transmission at its end time and log its outcome.
    pub fn complete_transmission(&mut self, handle: TxHandle, now: SimTime) -> Result<TransmissionRecord, SimError> {
        let idx = self
            .active
            .iter()
            .position(|a| a.handle == handle)
            .ok_or(SimError::UnknownTransmission(handle))?;
        if self.active[idx].end != now {
            return Err(SimError::InvalidTransmission(format!(
                "{:?} completed at {} but ends at {}",
                handle, now, self.active[idx].end
            )));
        }

        let active = self.active.swap_remove(idx);
        self.now = self.now.max(now);

        let record = TransmissionRecord {
            owner: active.request.owner,
            technology: active.request.technology,
            start: active.request.start,
            duration: active.request.duration,
            payload_duration: active.request.payload_duration,
            outcome: if active.collided { Outcome::Collision } else { Outcome::Success },
        };
        self.log_outcome(record.clone());
        Ok(record)
    }

    fn log_outcome(&mut self, record: TransmissionRecord) {
        tracing::trace!(
            "{} {:?} [{}, {}) -> {:?}",
            record.technology,
            record.owner,
            record.start,
            record.end(),
            record.outcome
        );
        self.records.push(record);
    }

    /// Finalized records in completion order.
    pub fn records(&self) -> &[TransmissionRecord] {
        &self.records
    }

    /// Consume the medium, returning the record log.
    pub fn into_records(self) -> Vec<TransmissionRecord> {
        self.records
    }

    /// Number of transmissions begun but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.active.len()
    }
}
