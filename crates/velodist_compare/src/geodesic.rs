use geo::{Distance, Geodesic};
use rayon::prelude::*;
use tracing::info;
use velodist_matrix::distance_matrix::DistanceMatrix;

/// Geodesic (WGS84 ellipsoid) distance in meters between every ordered pair.
pub fn geodesic_matrix<P>(points: &[P]) -> DistanceMatrix
where
    for<'a> &'a P: Into<geo::Point>,
{
    let points: Vec<geo::Point> = points.iter().map(|p| p.into()).collect();

    let rows: Vec<Vec<f64>> = points
        .par_iter()
        .map(|&from| {
            points
                .iter()
                .map(|&to| Geodesic.distance(from, to))
                .collect()
        })
        .collect();

    info!("Computed {} geodesic distances", points.len() * points.len());

    DistanceMatrix::from_fn(points.len(), |from, to| rows[from][to])
}
