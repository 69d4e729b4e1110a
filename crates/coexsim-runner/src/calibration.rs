//! Dynamic contention window sizing by calibration runs.
//!
//! Every grid point `min_cw, min_cw + step, ..., max_cw` is simulated with the
//! Wi-Fi window pinned at that value for a few short runs. The mean Wi-Fi and
//! NR-U occupancies are compared; where their difference changes sign the
//! window is interpolated linearly between the two neighbouring grid points.
//! Without a sign change the grid point with the smallest difference wins.

use crate::{execute_run, RunnerError};
use coexsim_model::RunConfig;
use rayon::prelude::*;
use serde::Serialize;

/// Mean occupancies measured at one grid window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationPoint {
    /// Pinned Wi-Fi window.
    pub cw: u32,
    /// Mean Wi-Fi channel occupancy.
    pub wifi_occupancy: f64,
    /// Mean NR-U channel occupancy.
    pub nru_occupancy: f64,
}

impl CalibrationPoint {
    fn gap(&self) -> f64 {
        self.wifi_occupancy - self.nru_occupancy
    }
}

/// Outcome of a calibration sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Calibration {
    /// Selected window.
    pub cw: u32,
    /// Measurements in grid order. Empty when one technology is absent.
    pub points: Vec<CalibrationPoint>,
}

/// Grid windows from `min` to `max` in `step` increments. `max` is always
/// the last point.
pub fn calibration_grid(min: u32, max: u32, step: u32) -> Vec<u32> {
    let mut grid: Vec<u32> = (min..=max).step_by(step.max(1) as usize).collect();
    if grid.last() != Some(&max) {
        grid.push(max);
    }
    grid
}

/// Size the Wi-Fi window for `config`'s node counts by calibration runs.
///
/// With no Wi-Fi stations or no gNBs there is no occupancy to balance and
/// the lower bound of the range is returned without simulating.
pub fn calibrate(config: &RunConfig) -> Result<Calibration, RunnerError> {
    config.validate()?;
    let params = config.dynamic_cw;
    if config.nodes.wifi == 0 || config.nodes.nru == 0 {
        return Ok(Calibration {
            cw: params.min_cw,
            points: Vec::new(),
        });
    }

    let grid = calibration_grid(params.min_cw, params.max_cw, params.step);
    let runs = params.calibration_runs;
    tracing::info!(
        "Calibrating CW for {} wifi / {} nru over {} windows x {} runs",
        config.nodes.wifi,
        config.nodes.nru,
        grid.len(),
        runs
    );

    let jobs: Vec<(u32, u32)> = grid
        .iter()
        .flat_map(|&cw| (0..runs).map(move |run| (cw, run)))
        .collect();
    let occupancies = jobs
        .par_iter()
        .map(|&(cw, run)| {
            let mut pinned = config.clone();
            pinned.wifi.min_cw = cw;
            pinned.wifi.max_cw = cw;
            pinned.simulation.duration_us = params.calibration_duration_us;
            // Calibration traffic stays out of the batch metrics.
            let report = metrics::with_local_recorder(&metrics::NoopRecorder, || {
                execute_run(&pinned, run, false, None)
            })?;
            Ok((report.summary.channel_occupancy_wifi, report.summary.channel_occupancy_nru))
        })
        .collect::<Result<Vec<(f64, f64)>, RunnerError>>()?;

    let points: Vec<CalibrationPoint> = grid
        .iter()
        .zip(occupancies.chunks(runs as usize))
        .map(|(&cw, samples)| {
            let n = samples.len() as f64;
            CalibrationPoint {
                cw,
                wifi_occupancy: samples.iter().map(|s| s.0).sum::<f64>() / n,
                nru_occupancy: samples.iter().map(|s| s.1).sum::<f64>() / n,
            }
        })
        .collect();

    let cw = select_window(&points).unwrap_or(params.min_cw);
    tracing::info!("Calibrated CW: {}", cw);
    Ok(Calibration { cw, points })
}

/// Window where Wi-Fi and NR-U occupancy cross, or the closest grid point.
fn select_window(points: &[CalibrationPoint]) -> Option<u32> {
    for pair in points.windows(2) {
        let (a, b) = (pair[0].gap(), pair[1].gap());
        if a == 0.0 {
            return Some(pair[0].cw);
        }
        if b == 0.0 || a.signum() != b.signum() {
            let fraction = a / (a - b);
            let span = f64::from(pair[1].cw - pair[0].cw);
            return Some((f64::from(pair[0].cw) + fraction * span).round() as u32);
        }
    }
    points
        .iter()
        .min_by(|x, y| x.gap().abs().total_cmp(&y.gap().abs()))
        .map(|p| p.cw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coexsim_model::CwStrategy;

    fn point(cw: u32, wifi: f64, nru: f64) -> CalibrationPoint {
        CalibrationPoint {
            cw,
            wifi_occupancy: wifi,
            nru_occupancy: nru,
        }
    }

    fn calibration_config(wifi: u32, nru: u32) -> RunConfig {
        let mut config = RunConfig::default();
        config.nodes.wifi = wifi;
        config.nodes.nru = nru;
        config.wifi.min_cw = 0;
        config.wifi.max_cw = 0;
        config.dynamic_cw.strategy = CwStrategy::Calibration;
        config.dynamic_cw.step = 96;
        config.dynamic_cw.calibration_duration_us = 20_000;
        config.dynamic_cw.calibration_runs = 2;
        config
    }

    #[test]
    fn test_grid_matches_default_sweep() {
        let grid = calibration_grid(32, 512, 48);
        assert_eq!(grid.len(), 11);
        assert_eq!(grid[1], 80);
        assert_eq!(grid.last(), Some(&512));
        assert_eq!(calibration_grid(32, 100, 48), vec![32, 80, 100]);
        assert_eq!(calibration_grid(64, 64, 48), vec![64]);
    }

    #[test]
    fn test_crossing_is_interpolated() {
        let points = [
            point(32, 0.8, 0.1),
            point(80, 0.5, 0.3),
            point(128, 0.3, 0.5),
            point(176, 0.2, 0.6),
        ];
        // Gap 0.2 at 80 and -0.2 at 128 cross halfway.
        assert_eq!(select_window(&points), Some(104));
    }

    #[test]
    fn test_exact_balance_wins() {
        let points = [point(32, 0.6, 0.2), point(80, 0.4, 0.4), point(128, 0.2, 0.6)];
        assert_eq!(select_window(&points), Some(80));
    }

    #[test]
    fn test_without_crossing_closest_point_wins() {
        let points = [point(32, 0.9, 0.1), point(80, 0.8, 0.15), point(128, 0.7, 0.2)];
        assert_eq!(select_window(&points), Some(128));
        assert_eq!(select_window(&[]), None);
    }

    #[test]
    fn test_single_technology_skips_sweep() {
        let calibration = calibrate(&calibration_config(3, 0)).unwrap();
        assert_eq!(calibration.cw, 32);
        assert!(calibration.points.is_empty());
    }

    #[test]
    fn test_calibration_sweeps_grid_reproducibly() {
        let config = calibration_config(3, 2);
        let first = calibrate(&config).unwrap();
        let second = calibrate(&config).unwrap();
        assert_eq!(first, second);

        let windows: Vec<u32> = first.points.iter().map(|p| p.cw).collect();
        assert_eq!(windows, calibration_grid(32, 512, 96));
        assert!((32..=512).contains(&first.cw));
        for p in &first.points {
            assert!(p.wifi_occupancy + p.nru_occupancy <= 1.0 + 1e-12);
        }
    }
}
