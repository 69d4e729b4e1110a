//! Contention primitives shared by the Wi-Fi and NR-U state machines.

use crate::RadioError;
use coexsim_common::{SimTime, WirelessMedium};
use rand::Rng;

// ============================================================================
// Contention Window
// ============================================================================

/// Range from which backoff slot counts are drawn.
///
/// Invariant: `min <= current <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentionWindow {
    current: u32,
    min: u32,
    max: u32,
}

impl ContentionWindow {
    /// Window starting at `min`, growing up to `max`.
    pub fn new(min: u32, max: u32) -> Result<Self, RadioError> {
        if min > max {
            return Err(RadioError::InvertedWindow { min, max });
        }
        Ok(ContentionWindow { current: min, min, max })
    }

    /// Window pinned at a single value; it never grows.
    pub fn fixed(value: u32) -> Self {
        ContentionWindow {
            current: value,
            min: value,
            max: value,
        }
    }

    /// Current upper bound of the draw.
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Lower bound.
    pub fn min(&self) -> u32 {
        self.min
    }

    /// Upper bound.
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Whether the window can never change.
    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    /// Binary exponential growth: `(cw + 1) * 2 - 1`, capped at `max`.
    pub fn double(&mut self) {
        let grown = self.current.saturating_add(1).saturating_mul(2) - 1;
        self.current = grown.clamp(self.min, self.max);
    }

    /// Back to `min`.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Uniform slot count in `[0, current]`.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        rng.gen_range(0..=self.current)
    }
}

// ============================================================================
// Retry Counter
// ============================================================================

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Try the same frame again.
    Retry,
    /// The limit was reached; the frame is dropped and the counter reset.
    Exhausted,
}

/// Consecutive failed attempts of the current frame.
///
/// Invariant: `0 <= count <= limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    count: u32,
    limit: u32,
}

impl RetryCounter {
    /// Counter allowing `limit` attempts per frame.
    pub fn new(limit: u32) -> Self {
        RetryCounter { count: 0, limit }
    }

    /// Failed attempts so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Configured limit.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count a failed attempt. Reaching the limit resets the counter.
    pub fn record_failure(&mut self) -> RetryVerdict {
        self.count += 1;
        if self.count >= self.limit {
            self.count = 0;
            RetryVerdict::Exhausted
        } else {
            RetryVerdict::Retry
        }
    }

    /// Frame delivered.
    pub fn reset(&mut self) {
        self.count = 0;
    }
}

// ============================================================================
// Busy-Freeze Countdown
// ============================================================================

/// Result of advancing a [`Countdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStatus {
    /// The counter reached zero at the current time; transmit now.
    Expired,
    /// Assuming the channel stays as currently known, the counter expires at
    /// this time. Re-advance then.
    WakeAt(SimTime),
}

/// Backoff counter that waits for an idle inter-frame space, then counts down
/// idle slots.
///
/// Whenever the channel turns busy, the countdown freezes: whole slots already
/// counted are kept, the partial slot is lost, and counting resumes only after
/// the channel has again been idle for a full inter-frame space.
///
/// The countdown is evaluated lazily against the medium's busy timeline. Between
/// wake-ups the station does nothing observable, so replaying the elapsed span
/// at wake-up is equivalent to counting slot by slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    /// Time up to which the channel history has been accounted for.
    at: SimTime,
    slots: u32,
    needs_ifs: bool,
    ifs: SimTime,
    slot: SimTime,
}

impl Countdown {
    /// Countdown that first requires `ifs` of idle channel starting at `at`.
    pub fn after_ifs(at: SimTime, slots: u32, ifs: SimTime, slot: SimTime) -> Self {
        Countdown { at, slots, needs_ifs: true, ifs, slot }
    }

    /// Countdown on a channel that has just been sensed idle at `at`.
    pub fn immediate(at: SimTime, slots: u32, ifs: SimTime, slot: SimTime) -> Self {
        Countdown { at, slots, needs_ifs: false, ifs, slot }
    }

    /// Slots still to count.
    pub fn remaining_slots(&self) -> u32 {
        self.slots
    }

    /// Whether the countdown is waiting for an inter-frame space.
    pub fn is_deferring(&self) -> bool {
        self.needs_ifs
    }

    /// Replay the channel history up to `now`.
    pub fn advance(&mut self, medium: &WirelessMedium, now: SimTime) -> CountdownStatus {
        loop {
            if let Some(period) = medium.busy_period_at(self.at) {
                self.at = period.end;
                self.needs_ifs = true;
                continue;
            }

            let ifs = if self.needs_ifs { self.ifs } else { SimTime::ZERO };
            let need = ifs + self.slot.times(self.slots);
            let done = self.at + need;

            match medium.next_busy_start_after(self.at) {
                Some(busy_start) if busy_start - self.at < need => {
                    let idle = busy_start - self.at;
                    if idle > ifs {
                        let counted = (idle - ifs).as_micros() / self.slot.as_micros().max(1);
                        self.slots -= counted as u32;
                    }
                    self.at = busy_start;
                    self.needs_ifs = true;
                }
                _ => {
                    return if done <= now {
                        CountdownStatus::Expired
                    } else {
                        CountdownStatus::WakeAt(done)
                    };
                }
            }
        }
    }
}
