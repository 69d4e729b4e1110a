//! Contention window sizing from the number of contenders.
//!
//! Uses the saturated-DCF model: a station with a fixed window `W` attempts
//! in a random slot with probability `tau = 2 / (W + 2)`. For `n` contenders,
//! channel throughput is maximal where
//!
//! ```text
//! (1 - T) * (1 - tau)^n + T - T * n * tau = 0
//! ```
//!
//! with `T` the cost of a collision measured in idle slots. The left-hand side
//! grows with `W` and shrinks with `n`, so the smallest window that makes it
//! non-negative is found by bisection and never decreases as `n` grows.
//! Minimizing collision probability alone would always pick the largest
//! window; the throughput optimum trades idle slots against collisions.

use crate::{ppdu_airtime, RadioError, WifiTiming};

/// Inclusive range of candidate windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CwSearchRange {
    /// Smallest candidate.
    pub min_cw: u32,
    /// Largest candidate.
    pub max_cw: u32,
}

impl Default for CwSearchRange {
    fn default() -> Self {
        CwSearchRange { min_cw: 32, max_cw: 512 }
    }
}

/// Collision cost parameters of the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverModel {
    /// Channel time lost to one collision, in backoff slots.
    pub collision_slots: f64,
}

impl Default for SolverModel {
    /// 1472-byte frames at MCS 7: 248 us PPDU, ACK timeout and DIFS.
    fn default() -> Self {
        SolverModel {
            collision_slots: (248 + 45 + 43) as f64 / 9.0,
        }
    }
}

impl SolverModel {
    /// Model for the given Wi-Fi frame.
    pub fn for_frame(payload_bytes: u32, mcs: u8) -> Result<Self, RadioError> {
        let timing = WifiTiming::default();
        let lost = ppdu_airtime(payload_bytes, mcs)? + timing.ack_timeout + timing.difs;
        Ok(SolverModel {
            collision_slots: lost.as_micros() as f64 / timing.slot.as_micros() as f64,
        })
    }

    fn residual(&self, cw: u32, contenders: u32) -> f64 {
        let t = self.collision_slots;
        let tau = attempt_probability(cw);
        let n = f64::from(contenders);
        (1.0 - t) * (1.0 - tau).powf(n) + t - t * n * tau
    }

    /// Smallest window in `range` at or beyond the throughput optimum for
    /// `wifi + nru` contenders.
    ///
    /// With at most one contender there is nobody to collide with and the
    /// lower bound is returned. If no candidate reaches the optimum the upper
    /// bound is returned.
    pub fn solve(&self, wifi: u32, nru: u32, range: CwSearchRange) -> u32 {
        let contenders = wifi.saturating_add(nru);
        if contenders <= 1 {
            return range.min_cw;
        }
        if self.residual(range.max_cw, contenders) < 0.0 {
            return range.max_cw;
        }

        let (mut lo, mut hi) = (range.min_cw, range.max_cw);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.residual(mid, contenders) >= 0.0 {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        tracing::debug!("dynamic CW for {} wifi + {} nru: {}", wifi, nru, lo);
        lo
    }
}

/// Per-slot attempt probability of a saturated station with window `cw`.
pub fn attempt_probability(cw: u32) -> f64 {
    2.0 / (f64::from(cw) + 2.0)
}

/// Probability that an attempt collides when `contenders` stations share
/// window `cw`.
pub fn predicted_collision_probability(contenders: u32, cw: u32) -> f64 {
    if contenders <= 1 {
        return 0.0;
    }
    1.0 - (1.0 - attempt_probability(cw)).powf(f64::from(contenders - 1))
}

/// [`SolverModel::solve`] with the default frame.
pub fn solve(wifi: u32, nru: u32, range: CwSearchRange) -> u32 {
    SolverModel::default().solve(wifi, nru, range)
}
