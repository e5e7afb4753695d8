use crate::{error::MatrixError, graphhopper_api::GHPoint, window::IndexWindow};

/// Returns the `[lon, lat]` pairs of the points inside `window`, in index order.
/// Rows and columns of a returned block line up with this order.
pub fn extract_coordinates<P>(points: &[P], window: IndexWindow) -> Result<Vec<GHPoint>, MatrixError>
where
    for<'a> &'a P: Into<geo_types::Point>,
{
    if window.start > window.end || window.end > points.len() {
        return Err(MatrixError::IndexOutOfRange {
            window,
            len: points.len(),
        });
    }

    Ok(points[window.start..window.end]
        .iter()
        .map(|p| {
            let point: geo_types::Point = p.into();
            [point.x(), point.y()]
        })
        .collect())
}
