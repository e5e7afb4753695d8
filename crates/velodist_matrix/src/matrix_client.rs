use std::future::Future;

use crate::graphhopper_api::{GHPoint, GraphHopperProfile};

/// A remote service returning one dense block of distances per call.
pub trait MatrixClient {
    /// Performs exactly one call and returns a `origins.len() × destinations.len()`
    /// block, row per origin. Unreachable pairs are `NaN`.
    ///
    /// Implementations must not retry: a failed block is retried by a later run.
    fn request_sub_matrix(
        &self,
        origins: &[GHPoint],
        destinations: &[GHPoint],
        profile: GraphHopperProfile,
    ) -> impl Future<Output = anyhow::Result<Vec<Vec<f64>>>> + Send;
}
