//! Reduction of a run's transmission log to the reported channel metrics.
//!
//! Occupancy counts channel time, not requested airtime: where collided
//! records overlap, the shared stretch is split evenly among the records on
//! the air, so occupancies of all technologies add up to the busy fraction
//! of the run and never exceed one.

use coexsim_common::{EntityId, SimTime, Technology, TransmissionRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Per-technology detail of a [`RunSummary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TechnologySummary {
    /// Channel time attributed to the technology over run duration.
    pub occupancy: f64,
    /// Payload time of the technology's successful records over run duration.
    pub efficiency: f64,
    /// Collided records over all records of the technology.
    pub collision_probability: f64,
    /// Finalized records.
    pub transmissions: u64,
    /// Records that ended in collision.
    pub collisions: u64,
}

/// Reported metrics of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Wi-Fi share of channel time.
    pub channel_occupancy_wifi: f64,
    /// NR-U share of channel time.
    pub channel_occupancy_nru: f64,
    /// Busy fraction of the run.
    pub channel_occupancy_total: f64,
    /// Payload time of successful records over run duration.
    pub channel_efficiency: f64,
    /// Collided records over all records.
    pub collision_probability: f64,
    /// Jain's index over the two occupancy shares.
    pub jain_fairness_index: f64,
    /// Jain's index scaled by total occupancy.
    pub joint_airtime_fairness: f64,
    /// Wi-Fi detail.
    pub wifi: TechnologySummary,
    /// NR-U detail.
    pub nru: TechnologySummary,
}

/// Jain's fairness index `(sum x)^2 / (n * sum x^2)`; 1.0 when every share
/// is zero.
pub fn jain_fairness_index(shares: &[f64]) -> f64 {
    let sum: f64 = shares.iter().sum();
    let sum_sq: f64 = shares.iter().map(|x| x * x).sum();
    if sum_sq == 0.0 {
        return 1.0;
    }
    sum * sum / (shares.len() as f64 * sum_sq)
}

/// Channel time attributed to each record, in microseconds, by index.
pub fn apportioned_airtime(records: &[TransmissionRecord]) -> Vec<f64> {
    // Ends sort before starts at the same instant: touching records do not
    // share channel time.
    let mut edges: Vec<(SimTime, bool, usize)> = Vec::with_capacity(records.len() * 2);
    for (idx, record) in records.iter().enumerate() {
        edges.push((record.start, true, idx));
        edges.push((record.end(), false, idx));
    }
    edges.sort();

    let mut shares = vec![0.0; records.len()];
    let mut active: BTreeSet<usize> = BTreeSet::new();
    let mut last = SimTime::ZERO;
    for (time, is_start, idx) in edges {
        if !active.is_empty() && time > last {
            let slice = (time - last).as_micros() as f64 / active.len() as f64;
            for &open in &active {
                shares[open] += slice;
            }
        }
        last = time;
        if is_start {
            active.insert(idx);
        } else {
            active.remove(&idx);
        }
    }
    shares
}

/// Apportioned channel time per transmitting entity, in microseconds.
pub fn airtime_by_owner(records: &[TransmissionRecord]) -> BTreeMap<EntityId, f64> {
    let mut by_owner = BTreeMap::new();
    for (record, share) in records.iter().zip(apportioned_airtime(records)) {
        *by_owner.entry(record.owner).or_insert(0.0) += share;
    }
    by_owner
}

/// Compute the run metrics from the finalized records of a run of length
/// `duration`.
pub fn summarize(records: &[TransmissionRecord], duration: SimTime) -> RunSummary {
    let total = duration.as_micros() as f64;
    let shares = apportioned_airtime(records);

    let tech_summary = |technology: Technology| {
        let mut summary = TechnologySummary::default();
        if total == 0.0 {
            return summary;
        }
        let mut occupied = 0.0;
        let mut payload = 0.0;
        for (record, share) in records.iter().zip(&shares) {
            if record.technology != technology {
                continue;
            }
            summary.transmissions += 1;
            occupied += share;
            if record.is_success() {
                payload += record.payload_duration.as_micros() as f64;
            } else {
                summary.collisions += 1;
            }
        }
        summary.occupancy = occupied / total;
        summary.efficiency = payload / total;
        summary.collision_probability = ratio(summary.collisions, summary.transmissions);
        summary
    };

    let wifi = tech_summary(Technology::Wifi);
    let nru = tech_summary(Technology::Nru);
    let jfi = jain_fairness_index(&[wifi.occupancy, nru.occupancy]);
    let occupancy_total = wifi.occupancy + nru.occupancy;

    RunSummary {
        channel_occupancy_wifi: wifi.occupancy,
        channel_occupancy_nru: nru.occupancy,
        channel_occupancy_total: occupancy_total,
        channel_efficiency: wifi.efficiency + nru.efficiency,
        collision_probability: ratio(wifi.collisions + nru.collisions, wifi.transmissions + nru.transmissions),
        jain_fairness_index: jfi,
        joint_airtime_fairness: jfi * occupancy_total,
        wifi,
        nru,
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coexsim_common::Outcome;

    fn record(owner: u64, technology: Technology, start: u64, duration: u64, payload: u64, outcome: Outcome) -> TransmissionRecord {
        TransmissionRecord {
            owner: EntityId(owner),
            technology,
            start: SimTime::from_micros(start),
            duration: SimTime::from_micros(duration),
            payload_duration: SimTime::from_micros(payload),
            outcome,
        }
    }

    #[test]
    fn test_empty_log() {
        let summary = summarize(&[], SimTime::from_micros(10_000));
        assert_eq!(summary.channel_occupancy_wifi, 0.0);
        assert_eq!(summary.channel_efficiency, 0.0);
        assert_eq!(summary.collision_probability, 0.0);
        assert_eq!(summary.jain_fairness_index, 1.0);
        assert_eq!(summary.joint_airtime_fairness, 0.0);
    }

    #[test]
    fn test_zero_duration() {
        let records = [record(1, Technology::Wifi, 0, 100, 100, Outcome::Success)];
        let summary = summarize(&records, SimTime::ZERO);
        assert_eq!(summary.channel_occupancy_total, 0.0);
        assert_eq!(summary.jain_fairness_index, 1.0);
    }

    #[test]
    fn test_successful_records() {
        let records = [
            record(1, Technology::Wifi, 0, 250, 250, Outcome::Success),
            record(2, Technology::Nru, 300, 6000, 5000, Outcome::Success),
        ];
        let summary = summarize(&records, SimTime::from_micros(10_000));
        assert!((summary.channel_occupancy_wifi - 0.025).abs() < 1e-12);
        assert!((summary.channel_occupancy_nru - 0.6).abs() < 1e-12);
        assert!((summary.channel_efficiency - 0.525).abs() < 1e-12);
        assert!((summary.nru.efficiency - 0.5).abs() < 1e-12);
        assert_eq!(summary.collision_probability, 0.0);
    }

    #[test]
    fn test_overlapping_collisions_are_apportioned() {
        let records = [
            record(1, Technology::Wifi, 0, 100, 100, Outcome::Collision),
            record(2, Technology::Nru, 50, 100, 100, Outcome::Collision),
        ];
        let shares = apportioned_airtime(&records);
        assert_eq!(shares, vec![75.0, 75.0]);

        let summary = summarize(&records, SimTime::from_micros(150));
        assert!((summary.channel_occupancy_total - 1.0).abs() < 1e-12);
        assert_eq!(summary.channel_efficiency, 0.0);
        assert_eq!(summary.collision_probability, 1.0);
        assert_eq!(summary.wifi.collision_probability, 1.0);
    }

    #[test]
    fn test_touching_records_share_nothing() {
        let records = [
            record(1, Technology::Wifi, 0, 100, 100, Outcome::Success),
            record(1, Technology::Wifi, 100, 100, 100, Outcome::Success),
        ];
        assert_eq!(apportioned_airtime(&records), vec![100.0, 100.0]);
        assert_eq!(airtime_by_owner(&records).get(&EntityId(1)), Some(&200.0));
    }

    #[test]
    fn test_jain_fairness_index() {
        assert_eq!(jain_fairness_index(&[0.0, 0.0]), 1.0);
        assert_eq!(jain_fairness_index(&[0.3, 0.3]), 1.0);
        assert!((jain_fairness_index(&[0.5, 0.0]) - 0.5).abs() < 1e-12);
        let skewed = jain_fairness_index(&[0.6, 0.2]);
        assert!(skewed > 0.5 && skewed < 1.0);
    }
}
