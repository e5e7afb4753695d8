use std::{
    collections::BTreeSet,
    fs::File,
    hash::{Hash, Hasher},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use fxhash::FxHasher64;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    distance_matrix::{DistanceMatrix, SerializedRows},
    error::MatrixError,
    graphhopper_api::GraphHopperProfile,
    window::IndexWindow,
};

pub const SNAPSHOT_VERSION: u32 = 1;

/// One (origin window, destination window) request that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BlockFailure {
    #[schemars(with = "(usize, usize)")]
    pub origin: IndexWindow,
    #[schemars(with = "(usize, usize)")]
    pub destination: IndexWindow,
    pub cause: String,
}

/// Resumable state of a computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub matrix: DistanceMatrix,
    /// Origin windows for which every destination window was visited
    pub completed: BTreeSet<IndexWindow>,
    pub failures: Vec<BlockFailure>,
}

impl Progress {
    pub fn new(num_stations: usize) -> Self {
        Self {
            matrix: DistanceMatrix::unset(num_stations),
            completed: BTreeSet::new(),
            failures: Vec::new(),
        }
    }
}

/// On-disk form of [`Progress`].
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSnapshot {
    pub version: u32,
    /// Identity of the station set, window size and profile, as 16 hex digits
    pub fingerprint: String,
    /// Row per origin station, `null` for distances not computed yet
    #[schemars(with = "SerializedRows")]
    pub distances: DistanceMatrix,
    #[schemars(with = "Vec<(usize, usize)>")]
    pub completed_windows: Vec<IndexWindow>,
    #[serde(default)]
    pub failed_blocks: Vec<BlockFailure>,
    pub last_updated: jiff::Timestamp,
}

pub trait ProgressStore {
    /// Returns the last saved progress. A missing snapshot and an unusable one
    /// both yield `None`.
    fn load(&self) -> Option<Progress>;

    /// Replaces the saved progress.
    fn save(&self, progress: &Progress) -> Result<(), MatrixError>;

    fn clear(&self) -> Result<(), MatrixError>;
}

fn hash_points<H, P>(points: &[P], hasher: &mut H)
where
    H: Hasher,
    for<'a> &'a P: Into<geo_types::Point>,
{
    points.len().hash(hasher);
    for point in points {
        let point = point.into();
        hasher.write_u64(point.x().to_bits());
        hasher.write_u64(point.y().to_bits());
    }
}

/// Stable identity of a computation: a snapshot only resumes the run it was
/// written for.
pub fn snapshot_fingerprint<P>(
    points: &[P],
    window_size: usize,
    profile: GraphHopperProfile,
) -> u64
where
    for<'a> &'a P: Into<geo_types::Point>,
{
    let mut hasher = FxHasher64::default();

    hash_points(points, &mut hasher);
    window_size.hash(&mut hasher);
    profile.hash(&mut hasher);

    hasher.finish()
}

pub struct FileProgressStore {
    path: PathBuf,
    fingerprint: u64,
}

impl FileProgressStore {
    pub fn new(path: impl Into<PathBuf>, fingerprint: u64) -> Self {
        Self {
            path: path.into(),
            fingerprint,
        }
    }

    /// Store named after the fingerprint inside `folder`.
    pub fn in_folder(folder: &Path, fingerprint: u64) -> Self {
        Self::new(
            folder.join(format!("{:016x}.progress.json", fingerprint)),
            fingerprint,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn corrupt(&self, reason: impl Into<String>) -> MatrixError {
        MatrixError::SnapshotCorrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    /// `Ok(None)` when there is no snapshot, `SnapshotCorrupt` when there is
    /// one but it can't be used.
    pub fn read_snapshot(&self) -> Result<Option<ProgressSnapshot>, MatrixError> {
        if !self.path.is_file() {
            return Ok(None);
        }

        let file = File::open(&self.path).map_err(|err| self.corrupt(err.to_string()))?;
        let snapshot: ProgressSnapshot = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| self.corrupt(err.to_string()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(self.corrupt(format!(
                "unsupported version {}, expected {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let expected = format!("{:016x}", self.fingerprint);
        if snapshot.fingerprint != expected {
            return Err(self.corrupt(format!(
                "fingerprint {} doesn't match {}",
                snapshot.fingerprint, expected
            )));
        }

        let num_stations = snapshot.distances.num_stations();
        let out_of_bounds = |window: &IndexWindow| window.is_empty() || window.end > num_stations;
        if let Some(window) = snapshot.completed_windows.iter().find(|w| out_of_bounds(*w)) {
            return Err(self.corrupt(format!(
                "completed window {} is invalid for {} stations",
                window, num_stations
            )));
        }
        if let Some(failure) = snapshot
            .failed_blocks
            .iter()
            .find(|f| out_of_bounds(&f.origin) || out_of_bounds(&f.destination))
        {
            return Err(self.corrupt(format!(
                "failed block {} x {} is invalid for {} stations",
                failure.origin, failure.destination, num_stations
            )));
        }

        Ok(Some(snapshot))
    }

    fn write_snapshot(&self, snapshot: &ProgressSnapshot) -> Result<(), MatrixError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.temp_path();
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        serde_json::to_writer(&mut writer, snapshot)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

impl ProgressStore for FileProgressStore {
    fn load(&self) -> Option<Progress> {
        match self.read_snapshot() {
            Ok(Some(snapshot)) => Some(Progress {
                matrix: snapshot.distances,
                completed: snapshot.completed_windows.into_iter().collect(),
                failures: snapshot.failed_blocks,
            }),
            Ok(None) => None,
            Err(err) => {
                warn!("Ignoring progress snapshot, starting from scratch: {}", err);
                None
            }
        }
    }

    fn save(&self, progress: &Progress) -> Result<(), MatrixError> {
        let snapshot = ProgressSnapshot {
            version: SNAPSHOT_VERSION,
            fingerprint: format!("{:016x}", self.fingerprint),
            distances: progress.matrix.clone(),
            completed_windows: progress.completed.iter().copied().collect(),
            failed_blocks: progress.failures.clone(),
            last_updated: jiff::Timestamp::now(),
        };

        self.write_snapshot(&snapshot)?;
        debug!("Saved progress to {}", self.path.display());

        Ok(())
    }

    fn clear(&self) -> Result<(), MatrixError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Keeps progress in memory only, for dry runs and tests.
#[derive(Default)]
pub struct MemoryProgressStore {
    progress: Mutex<Option<Progress>>,
    saves: Mutex<usize>,
}

impl MemoryProgressStore {
    pub fn with_progress(progress: Progress) -> Self {
        Self {
            progress: Mutex::new(Some(progress)),
            saves: Mutex::new(0),
        }
    }

    pub fn progress(&self) -> Option<Progress> {
        self.progress.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn load(&self) -> Option<Progress> {
        self.progress()
    }

    fn save(&self, progress: &Progress) -> Result<(), MatrixError> {
        *self.progress.lock() = Some(progress.clone());
        *self.saves.lock() += 1;
        Ok(())
    }

    fn clear(&self) -> Result<(), MatrixError> {
        *self.progress.lock() = None;
        Ok(())
    }
}
