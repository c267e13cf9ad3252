// SPDX-License-Identifier: GPL-3.0-only

//! Trajectory smoothing
//!
//! Turns a noisy, sparse sequence of subject centers into a fully populated,
//! stable path in two stages:
//!
//! 1. cumulative-jump rejection against the mean of a trailing window
//! 2. per-axis linear gap interpolation followed by a sliding median
//!
//! Everything here is a pure function of its inputs.

use crate::constants::trajectory;
use crate::frame_processor::types::Point;
use serde::{Deserialize, Serialize};

/// Value given to gaps with no present neighbor on one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeFill {
    /// Leading/trailing gaps become 0.0
    #[default]
    Zero,
    /// Leading/trailing gaps copy the nearest present value
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherParams {
    /// Trailing inputs considered by jump rejection (absent ones included)
    pub window_size: usize,
    /// Largest accepted distance from the window mean
    pub max_deviation: f64,
    /// Median filter width; odd values give a symmetric window
    pub kernel_size: usize,
    pub edge_fill: EdgeFill,
}

impl Default for SmootherParams {
    fn default() -> Self {
        Self {
            window_size: trajectory::WINDOW_SIZE,
            max_deviation: trajectory::MAX_DEVIATION,
            kernel_size: trajectory::KERNEL_SIZE,
            edge_fill: EdgeFill::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrajectorySmoother {
    params: SmootherParams,
}

impl TrajectorySmoother {
    pub fn new(params: SmootherParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SmootherParams {
        &self.params
    }

    /// Run both stages; the output has one center per input index
    pub fn smooth(&self, centers: &[Option<Point>]) -> Vec<Point> {
        let filtered =
            filter_cumulative_jumps(centers, self.params.window_size, self.params.max_deviation);
        median_filter_centers(&filtered, self.params.kernel_size, self.params.edge_fill)
    }
}

/// Replace points that jump too far from the recent mean with `None`
///
/// The window holds the last `window_size` inputs, rejected and absent ones
/// as `None`, and only its present entries are averaged. A burst of rejected
/// points therefore shrinks the evidence for the old position, letting a
/// sustained move through instead of being outvoted by stale data forever.
pub fn filter_cumulative_jumps(
    centers: &[Option<Point>],
    window_size: usize,
    max_deviation: f64,
) -> Vec<Option<Point>> {
    let mut filtered = Vec::with_capacity(centers.len());
    let mut history: Vec<Option<Point>> = Vec::with_capacity(centers.len());

    for center in centers {
        let accepted = center.filter(|point| {
            let recent = &history[history.len().saturating_sub(window_size)..];
            match window_mean(recent) {
                Some(mean) => point.distance_to(&mean) <= max_deviation,
                None => true,
            }
        });
        filtered.push(accepted);
        history.push(accepted);
    }

    filtered
}

fn window_mean(window: &[Option<Point>]) -> Option<Point> {
    let (sum, count) = window
        .iter()
        .flatten()
        .fold((Point::ORIGIN, 0usize), |(sum, count), p| {
            (Point::new(sum.x + p.x, sum.y + p.y), count + 1)
        });
    (count > 0).then(|| Point::new(sum.x / count as f64, sum.y / count as f64))
}

/// Interpolate gaps per axis, then median filter each axis
pub fn median_filter_centers(
    centers: &[Option<Point>],
    kernel_size: usize,
    edge_fill: EdgeFill,
) -> Vec<Point> {
    let xs: Vec<Option<f64>> = centers.iter().map(|c| c.map(|p| p.x)).collect();
    let ys: Vec<Option<f64>> = centers.iter().map(|c| c.map(|p| p.y)).collect();

    let sx = median_filter(&interpolate_gaps(&xs, edge_fill), kernel_size);
    let sy = median_filter(&interpolate_gaps(&ys, edge_fill), kernel_size);

    sx.into_iter()
        .zip(sy)
        .map(|(x, y)| Point::new(x, y))
        .collect()
}

/// Fill every `None` by linear interpolation between its present neighbors
///
/// Gaps missing a neighbor on one side are resolved by `edge_fill`. A
/// sequence with no present value at all is all zeros.
pub fn interpolate_gaps(values: &[Option<f64>], edge_fill: EdgeFill) -> Vec<f64> {
    let present: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();

    let mut filled = Vec::with_capacity(values.len());
    // Index into `present` of the first present value at or after `i`
    let mut next_idx: usize = 0;

    for (i, value) in values.iter().enumerate() {
        if let Some(v) = value {
            filled.push(*v);
            next_idx += 1;
            continue;
        }

        let prev = next_idx.checked_sub(1).map(|k| present[k]);
        let next = present.get(next_idx).copied();
        let at = |idx: usize| values[idx].unwrap_or(0.0);

        let v = match (prev, next) {
            (Some(p), Some(n)) => at(p) + (at(n) - at(p)) * (i - p) as f64 / (n - p) as f64,
            (Some(p), None) if edge_fill == EdgeFill::Nearest => at(p),
            (None, Some(n)) if edge_fill == EdgeFill::Nearest => at(n),
            _ => 0.0,
        };
        filled.push(v);
    }

    filled
}

/// Sliding median with the window clipped to the sequence bounds
///
/// For clipped windows of even length the upper middle element is taken.
pub fn median_filter(data: &[f64], kernel_size: usize) -> Vec<f64> {
    let radius = kernel_size / 2;
    let mut window = Vec::with_capacity(radius * 2 + 1);

    (0..data.len())
        .map(|i| {
            let lower = i.saturating_sub(radius);
            let upper = (i + radius).min(data.len() - 1);
            window.clear();
            window.extend_from_slice(&data[lower..=upper]);
            window.sort_by(f64::total_cmp);
            window[window.len() / 2]
        })
        .collect()
}
