//! # coexsim-radio
//!
//! Channel access simulation for Wi-Fi and NR-U contenders.
//!
//! This crate provides:
//! - The radio parameter table ([`MCS_TABLE`], [`WifiTiming`], [`ppdu_airtime`])
//! - Contention primitives ([`backoff::ContentionWindow`], [`backoff::RetryCounter`],
//!   [`backoff::Countdown`])
//! - The Wi-Fi DCF entity ([`wifi::WifiStation`])
//! - The NR-U listen-before-talk entity ([`nru::NruBaseStation`])
//! - Contention window sizing from node counts ([`dynamic_cw::solve`])

pub mod backoff;
pub mod dynamic_cw;
pub mod nru;
pub mod wifi;

pub use backoff::{ContentionWindow, Countdown, CountdownStatus, RetryCounter, RetryVerdict};
pub use nru::{NruBaseStation, NruConfig, NruMode, SyncSchedule};
pub use wifi::{WifiPhase, WifiStation, WifiStationConfig};

/// Timer that starts a station's first access attempt. The model schedules
/// it once per station at time zero.
pub const TIMER_START: u64 = 0;

use coexsim_common::SimTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while resolving radio parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RadioError {
    /// The MCS index is not in the rate table.
    #[error("Unknown MCS index {0} (expected 0-7)")]
    UnknownMcs(u8),

    /// A frame must carry at least one byte.
    #[error("Payload size must be positive")]
    EmptyPayload,

    /// Contention window bounds are inverted.
    #[error("Contention window minimum {min} exceeds maximum {max}")]
    InvertedWindow {
        /// Lower bound.
        min: u32,
        /// Upper bound.
        max: u32,
    },
}

// ============================================================================
// Rate Table
// ============================================================================

/// One row of the OFDM rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct McsEntry {
    /// MCS index.
    pub index: u8,
    /// Data rate in bits per microsecond (Mb/s).
    pub data_rate: u32,
    /// Basic rate used for control responses, in bits per microsecond.
    pub control_rate: u32,
}

/// 20 MHz OFDM rates for MCS 0-7.
pub const MCS_TABLE: [McsEntry; 8] = [
    McsEntry { index: 0, data_rate: 6, control_rate: 6 },
    McsEntry { index: 1, data_rate: 9, control_rate: 6 },
    McsEntry { index: 2, data_rate: 12, control_rate: 12 },
    McsEntry { index: 3, data_rate: 18, control_rate: 12 },
    McsEntry { index: 4, data_rate: 24, control_rate: 24 },
    McsEntry { index: 5, data_rate: 36, control_rate: 24 },
    McsEntry { index: 6, data_rate: 48, control_rate: 24 },
    McsEntry { index: 7, data_rate: 54, control_rate: 24 },
];

/// Look up an MCS row.
pub fn mcs_entry(index: u8) -> Result<McsEntry, RadioError> {
    MCS_TABLE
        .get(usize::from(index))
        .copied()
        .ok_or(RadioError::UnknownMcs(index))
}

// ============================================================================
// Timing Constants
// ============================================================================

/// Legacy preamble.
pub const OFDM_PREAMBLE: SimTime = SimTime::from_micros(16);
/// SIGNAL field.
pub const OFDM_SIGNAL: SimTime = SimTime::from_micros(4);
/// OFDM symbol length.
pub const OFDM_SYMBOL: SimTime = SimTime::from_micros(4);
/// SERVICE field plus tail bits.
pub const SERVICE_TAIL_BITS: u64 = 22;
/// MAC header and FCS.
pub const MAC_OVERHEAD_BITS: u64 = 320;

/// Fixed 802.11 timing used by the DCF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiTiming {
    /// Backoff slot.
    pub slot: SimTime,
    /// Short inter-frame space.
    pub sifs: SimTime,
    /// DCF inter-frame space (`SIFS + 3 * slot`).
    pub difs: SimTime,
    /// SIFS plus ACK frame, spent silent after a delivered frame.
    pub ack_exchange: SimTime,
    /// Wait for a missing ACK after a collided frame.
    pub ack_timeout: SimTime,
}

impl WifiTiming {
    /// Backoff slot (9 us).
    pub const SLOT: SimTime = SimTime::from_micros(9);
    /// SIFS (16 us).
    pub const SIFS: SimTime = SimTime::from_micros(16);
    /// DIFS (43 us).
    pub const DIFS: SimTime = SimTime::from_micros(16 + 3 * 9);
    /// SIFS + ACK (44 us).
    pub const ACK_EXCHANGE: SimTime = SimTime::from_micros(44);
    /// ACK timeout (45 us).
    pub const ACK_TIMEOUT: SimTime = SimTime::from_micros(45);
}

impl Default for WifiTiming {
    fn default() -> Self {
        WifiTiming {
            slot: Self::SLOT,
            sifs: Self::SIFS,
            difs: Self::DIFS,
            ack_exchange: Self::ACK_EXCHANGE,
            ack_timeout: Self::ACK_TIMEOUT,
        }
    }
}

// ============================================================================
// Airtime
// ============================================================================

/// Airtime of a data PPDU carrying `payload_bytes` at the given MCS.
///
/// Preamble and SIGNAL field, then the SERVICE/tail bits, MAC overhead and
/// payload padded to a whole number of OFDM symbols.
pub fn ppdu_airtime(payload_bytes: u32, mcs: u8) -> Result<SimTime, RadioError> {
    if payload_bytes == 0 {
        return Err(RadioError::EmptyPayload);
    }
    let entry = mcs_entry(mcs)?;
    let bits = SERVICE_TAIL_BITS + MAC_OVERHEAD_BITS + 8 * u64::from(payload_bytes);
    let bits_per_symbol = u64::from(entry.data_rate) * OFDM_SYMBOL.as_micros();
    let symbols = bits.div_ceil(bits_per_symbol);
    Ok(OFDM_PREAMBLE + OFDM_SIGNAL + SimTime::from_micros(symbols * OFDM_SYMBOL.as_micros()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ppdu_airtime_mcs7() {
        // 22 + 320 + 11776 bits = 57 symbols of 216 bits
        assert_eq!(ppdu_airtime(1472, 7).unwrap(), SimTime::from_micros(248));
    }

    #[test]
    fn test_ppdu_airtime_mcs0() {
        assert_eq!(ppdu_airtime(1472, 0).unwrap(), SimTime::from_micros(2040));
    }

    #[test]
    fn test_airtime_decreases_with_rate() {
        let airtimes: Vec<SimTime> = (0..8).map(|mcs| ppdu_airtime(1000, mcs).unwrap()).collect();
        assert!(airtimes.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_unknown_mcs() {
        assert_eq!(ppdu_airtime(1472, 8), Err(RadioError::UnknownMcs(8)));
        assert_eq!(ppdu_airtime(0, 7), Err(RadioError::EmptyPayload));
    }

    #[test]
    fn test_difs() {
        let timing = WifiTiming::default();
        assert_eq!(timing.difs, timing.sifs + timing.slot.times(3));
    }
}
