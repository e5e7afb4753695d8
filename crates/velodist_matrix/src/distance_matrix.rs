use serde::{Deserialize, Serialize};

use crate::window::IndexWindow;

/// Row values as serialized: unset cells are `null`.
pub type SerializedRows = Vec<Vec<Option<f64>>>;

/// N×N distances in meters, stored flat.
/// To find the index for a pair of stations, use the formula:
/// `index = from * num_stations + to`.
///
/// Cells that were never written hold `NaN`. The diagonal is always zero.
/// The matrix is directed: `from -> to` may differ from `to -> from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "SerializedRows", try_from = "SerializedRows")]
pub struct DistanceMatrix {
    distances: Vec<f64>,
    num_stations: usize,
}

impl DistanceMatrix {
    pub fn unset(num_stations: usize) -> Self {
        let mut distances = vec![f64::NAN; num_stations * num_stations];
        for i in 0..num_stations {
            distances[i * num_stations + i] = 0.0;
        }

        Self {
            distances,
            num_stations,
        }
    }

    pub fn from_fn<F>(num_stations: usize, distance: F) -> Self
    where
        F: Fn(usize, usize) -> f64,
    {
        let mut distances = Vec::with_capacity(num_stations * num_stations);
        for from in 0..num_stations {
            for to in 0..num_stations {
                distances.push(if from == to { 0.0 } else { distance(from, to) });
            }
        }

        Self {
            distances,
            num_stations,
        }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, String> {
        let num_stations = rows.len();
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != num_stations)
        {
            return Err(format!(
                "row {} has {} values, expected {}",
                i,
                row.len(),
                num_stations
            ));
        }

        let mut matrix = Self {
            distances: rows.into_iter().flatten().collect(),
            num_stations,
        };
        matrix.zero_diagonal();

        Ok(matrix)
    }

    #[inline(always)]
    fn index(&self, from: usize, to: usize) -> usize {
        from * self.num_stations + to
    }

    pub fn num_stations(&self) -> usize {
        self.num_stations
    }

    pub fn is_empty(&self) -> bool {
        self.num_stations == 0
    }

    /// Raw value, `NaN` when unset.
    #[inline(always)]
    pub fn value(&self, from: usize, to: usize) -> f64 {
        self.distances[self.index(from, to)]
    }

    pub fn get(&self, from: usize, to: usize) -> Option<f64> {
        let value = self.value(from, to);
        if value.is_nan() { None } else { Some(value) }
    }

    pub fn set(&mut self, from: usize, to: usize, value: f64) {
        let index = self.index(from, to);
        self.distances[index] = if from == to { 0.0 } else { value };
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks_exact panics on zero
        self.distances
            .chunks_exact(self.num_stations.max(1))
            .take(self.num_stations)
    }

    /// Writes `block` into the rectangle `origin × destination`.
    /// Returns an error message when the block doesn't have the window pair's shape.
    pub fn write_block(
        &mut self,
        origin: IndexWindow,
        destination: IndexWindow,
        block: &[Vec<f64>],
    ) -> Result<(), String> {
        if origin.end > self.num_stations || destination.end > self.num_stations {
            return Err(format!(
                "block {} x {} exceeds a matrix of {} stations",
                origin, destination, self.num_stations
            ));
        }

        if block.len() != origin.len() || block.iter().any(|row| row.len() != destination.len()) {
            return Err(format!(
                "expected a {}x{} block, got {} rows",
                origin.len(),
                destination.len(),
                block.len()
            ));
        }

        for (from, row) in origin.indices().zip(block) {
            for (to, &value) in destination.indices().zip(row) {
                self.set(from, to, value);
            }
        }

        Ok(())
    }

    pub fn block_is_set(&self, origin: IndexWindow, destination: IndexWindow) -> bool {
        origin.indices().all(|from| {
            destination
                .indices()
                .all(|to| !self.value(from, to).is_nan())
        })
    }

    pub fn unset_count(&self) -> usize {
        self.distances.iter().filter(|d| d.is_nan()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.unset_count() == 0
    }

    fn zero_diagonal(&mut self) {
        for i in 0..self.num_stations {
            let index = self.index(i, i);
            self.distances[index] = 0.0;
        }
    }
}

impl From<DistanceMatrix> for SerializedRows {
    fn from(matrix: DistanceMatrix) -> Self {
        matrix
            .rows()
            .map(|row| {
                row.iter()
                    .map(|&d| if d.is_nan() { None } else { Some(d) })
                    .collect()
            })
            .collect()
    }
}

impl TryFrom<SerializedRows> for DistanceMatrix {
    type Error = String;

    fn try_from(rows: SerializedRows) -> Result<Self, Self::Error> {
        DistanceMatrix::from_rows(
            rows.into_iter()
                .map(|row| row.into_iter().map(|d| d.unwrap_or(f64::NAN)).collect())
                .collect(),
        )
    }
}

/// Unset cells compare equal to each other.
impl PartialEq for DistanceMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.num_stations == other.num_stations
            && self
                .distances
                .iter()
                .zip(&other.distances)
                .all(|(a, b)| a == b || (a.is_nan() && b.is_nan()))
    }
}
