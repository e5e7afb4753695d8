use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use velodist_matrix::distance_matrix::DistanceMatrix;

use crate::student_t::two_sided_p_value;

pub const DEFAULT_HISTOGRAM_BINS: usize = 50;

#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("Matrices have different shapes: network {network}x{network}, geodesic {geodesic}x{geodesic}")]
    ShapeMismatch { network: usize, geodesic: usize },

    #[error("Station ids differ at position {position}: {network} vs {geodesic}")]
    LabelMismatch {
        position: usize,
        network: String,
        geodesic: String,
    },

    #[error("No station pair has both a network and a geodesic distance")]
    NoValidPairs,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairedTTest {
    pub t_statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
}

/// Differences are `network - geodesic`, in meters.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub pairs: usize,
    /// Off-diagonal pairs missing at least one distance
    pub missing_pairs: usize,
    pub mean_difference: f64,
    /// Population standard deviation
    pub std_difference: f64,
    pub median_difference: f64,
    pub min_difference: f64,
    pub max_difference: f64,
    /// Fraction of pairs where the network distance is longer
    pub network_longer_share: f64,
    /// Mean detour factor over pairs with a positive geodesic distance
    pub mean_ratio: Option<f64>,
    pub t_test: PairedTTest,
    #[serde(skip)]
    pub differences: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Both matrices must describe the same stations in the same order.
pub fn check_labels(network_ids: &[String], geodesic_ids: &[String]) -> Result<(), ComparisonError> {
    if network_ids.len() != geodesic_ids.len() {
        return Err(ComparisonError::ShapeMismatch {
            network: network_ids.len(),
            geodesic: geodesic_ids.len(),
        });
    }

    match network_ids
        .iter()
        .zip(geodesic_ids)
        .position(|(network, geodesic)| network != geodesic)
    {
        Some(position) => Err(ComparisonError::LabelMismatch {
            position,
            network: network_ids[position].clone(),
            geodesic: geodesic_ids[position].clone(),
        }),
        None => Ok(()),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn paired_t_test(differences: &[f64], mean_difference: f64) -> PairedTTest {
    let n = differences.len();
    if n < 2 {
        return PairedTTest {
            t_statistic: f64::NAN,
            degrees_of_freedom: 0,
            p_value: f64::NAN,
        };
    }

    let sample_variance = differences
        .iter()
        .map(|d| (d - mean_difference).powi(2))
        .sum::<f64>()
        / (n - 1) as f64;
    let standard_error = (sample_variance / n as f64).sqrt();

    let t_statistic = mean_difference / standard_error;
    let degrees_of_freedom = n - 1;

    PairedTTest {
        t_statistic,
        degrees_of_freedom,
        p_value: two_sided_p_value(t_statistic, degrees_of_freedom as f64),
    }
}

/// Compares every off-diagonal pair present in both matrices.
pub fn compare(
    network: &DistanceMatrix,
    geodesic: &DistanceMatrix,
) -> Result<ComparisonReport, ComparisonError> {
    let n = network.num_stations();
    if n != geodesic.num_stations() {
        return Err(ComparisonError::ShapeMismatch {
            network: n,
            geodesic: geodesic.num_stations(),
        });
    }

    let mut differences = Vec::with_capacity(n * n.saturating_sub(1));
    let mut ratios = Vec::new();
    let mut missing_pairs = 0;

    for from in 0..n {
        for to in (0..n).filter(|&to| to != from) {
            match (network.get(from, to), geodesic.get(from, to)) {
                (Some(network_distance), Some(geodesic_distance)) => {
                    differences.push(network_distance - geodesic_distance);
                    if geodesic_distance > 0.0 {
                        ratios.push(network_distance / geodesic_distance);
                    }
                }
                _ => missing_pairs += 1,
            }
        }
    }

    if differences.is_empty() {
        return Err(ComparisonError::NoValidPairs);
    }

    debug!(
        "Comparing {} pairs, {} missing",
        differences.len(),
        missing_pairs
    );

    let mean_difference = mean(&differences);
    let std_difference = (differences
        .iter()
        .map(|d| (d - mean_difference).powi(2))
        .sum::<f64>()
        / differences.len() as f64)
        .sqrt();

    let report = ComparisonReport {
        pairs: differences.len(),
        missing_pairs,
        mean_difference,
        std_difference,
        median_difference: median(&differences),
        min_difference: differences.iter().copied().fold(f64::INFINITY, f64::min),
        max_difference: differences.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        network_longer_share: differences.iter().filter(|&&d| d > 0.0).count() as f64
            / differences.len() as f64,
        mean_ratio: if ratios.is_empty() {
            None
        } else {
            Some(mean(&ratios))
        },
        t_test: paired_t_test(&differences, mean_difference),
        differences,
    };

    info!(
        "Mean difference {:.2} m over {} pairs, t = {:.4}, p = {:.3e}",
        report.mean_difference, report.pairs, report.t_test.t_statistic, report.t_test.p_value
    );

    Ok(report)
}

/// Equal-width bins spanning the values' range.
pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if min == max {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: values.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut counts = vec![0; bins];
    for value in values {
        let bin = (((value - min) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count,
        })
        .collect()
}
