use std::time::Duration;

use tracing::{error, info, warn};

use crate::{
    coordinates::extract_coordinates,
    distance_matrix::DistanceMatrix,
    error::MatrixError,
    graphhopper_api::GraphHopperProfile,
    matrix_client::MatrixClient,
    progress::{BlockFailure, Progress, ProgressStore},
    window::{IndexWindow, partition},
};

#[derive(Debug, Clone, Copy)]
pub struct AssemblerParams {
    pub window_size: usize,
    /// Wait after every request, whatever its outcome
    pub rate_limit: Duration,
    pub profile: GraphHopperProfile,
    /// Re-process completed origin windows that recorded failures
    pub retry_failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    Written,
    Failed(String),
}

/// Emitted after every request of a run.
#[derive(Debug, Clone)]
pub struct BlockEvent {
    pub origin: IndexWindow,
    pub destination: IndexWindow,
    pub outcome: BlockOutcome,
    /// Requests issued so far in this run, including this one
    pub request: usize,
    /// Requests this run will issue in total
    pub total_requests: usize,
}

#[derive(Debug)]
pub struct MatrixRun {
    pub matrix: DistanceMatrix,
    /// Failed blocks of this run and of the skipped origin windows
    pub failures: Vec<BlockFailure>,
    pub requests_issued: usize,
    /// Origin windows completed by a previous run
    pub skipped_windows: Vec<IndexWindow>,
}

impl MatrixRun {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.matrix.is_complete()
    }
}

type BlockObserver = Box<dyn Fn(&BlockEvent) + Send + Sync>;

/// Builds the full matrix one (origin window, destination window) request at
/// a time, persisting progress after every request.
pub struct MatrixAssembler<C, S> {
    params: AssemblerParams,
    client: C,
    store: S,
    observer: Option<BlockObserver>,
}

impl<C, S> MatrixAssembler<C, S>
where
    C: MatrixClient,
    S: ProgressStore,
{
    pub fn new(params: AssemblerParams, client: C, store: S) -> Self {
        Self {
            params,
            client,
            store,
            observer: None,
        }
    }

    pub fn on_block<F>(&mut self, callback: F)
    where
        F: Fn(&BlockEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(callback));
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run<P>(&self, points: &[P]) -> Result<MatrixRun, MatrixError>
    where
        for<'a> &'a P: Into<geo_types::Point>,
    {
        let num_stations = points.len();
        let windows = partition(num_stations, self.params.window_size)?;

        if windows.is_empty() {
            info!("No stations, nothing to compute");
            return Ok(MatrixRun {
                matrix: DistanceMatrix::unset(0),
                failures: Vec::new(),
                requests_issued: 0,
                skipped_windows: Vec::new(),
            });
        }

        let mut progress = self.initial_progress(num_stations, &windows);

        let pending_windows = windows
            .iter()
            .filter(|window| !progress.completed.contains(window))
            .count();
        let total_requests = pending_windows * windows.len();

        info!(
            "Computing {}x{} matrix: {} windows, {} requests, {:?} between requests",
            num_stations,
            num_stations,
            windows.len(),
            total_requests,
            self.params.rate_limit
        );

        let mut requests_issued = 0;
        let mut skipped_windows = Vec::new();

        for &origin in &windows {
            if progress.completed.contains(&origin) {
                info!("Skipping already processed origin window {}", origin);
                skipped_windows.push(origin);
                continue;
            }

            // the whole window is retried, its old failures no longer apply
            progress.failures.retain(|failure| failure.origin != origin);

            let origins = extract_coordinates(points, origin)?;

            for &destination in &windows {
                let destinations = extract_coordinates(points, destination)?;

                let result = self
                    .client
                    .request_sub_matrix(&origins, &destinations, self.params.profile)
                    .await;
                requests_issued += 1;

                let written = result
                    .map_err(|err| format!("{err:#}"))
                    .and_then(|block| progress.matrix.write_block(origin, destination, &block));

                let outcome = match written {
                    Ok(()) => {
                        info!("Processed: from {} to {}", origin, destination);
                        BlockOutcome::Written
                    }
                    Err(cause) => {
                        let err = MatrixError::RequestFailed {
                            origin,
                            destination,
                            cause: cause.clone(),
                        };
                        error!("{}", err);
                        progress.failures.push(BlockFailure {
                            origin,
                            destination,
                            cause: cause.clone(),
                        });
                        BlockOutcome::Failed(cause)
                    }
                };

                self.persist(&progress);

                if let Some(observer) = &self.observer {
                    observer(&BlockEvent {
                        origin,
                        destination,
                        outcome,
                        request: requests_issued,
                        total_requests,
                    });
                }

                tokio::time::sleep(self.params.rate_limit).await;
            }

            progress.completed.insert(origin);
            self.persist(&progress);
        }

        if !progress.failures.is_empty() {
            warn!(
                "{} blocks failed, {} distances are missing",
                progress.failures.len(),
                progress.matrix.unset_count()
            );
        }

        Ok(MatrixRun {
            matrix: progress.matrix,
            failures: progress.failures,
            requests_issued,
            skipped_windows,
        })
    }

    fn initial_progress(&self, num_stations: usize, windows: &[IndexWindow]) -> Progress {
        let Some(mut progress) = self.store.load() else {
            return Progress::new(num_stations);
        };

        if progress.matrix.num_stations() != num_stations {
            warn!(
                "Saved progress covers {} stations, expected {}; starting from scratch",
                progress.matrix.num_stations(),
                num_stations
            );
            return Progress::new(num_stations);
        }

        let before = progress.completed.len();
        progress.completed.retain(|window| windows.contains(window));
        if progress.completed.len() != before {
            warn!(
                "Dropped {} completed windows that don't match the current window size",
                before - progress.completed.len()
            );
        }
        progress
            .failures
            .retain(|failure| windows.contains(&failure.origin) && windows.contains(&failure.destination));

        if self.params.retry_failed {
            let failures = &progress.failures;
            let before = progress.completed.len();
            progress
                .completed
                .retain(|window| !failures.iter().any(|failure| failure.origin == *window));
            info!(
                "Retrying {} origin windows with failed blocks",
                before - progress.completed.len()
            );
        }

        info!(
            "Resuming: {}/{} origin windows already processed",
            progress.completed.len(),
            windows.len()
        );

        progress
    }

    fn persist(&self, progress: &Progress) {
        if let Err(err) = self.store.save(progress) {
            error!("Failed to save progress: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::{graphhopper_api::GHPoint, progress::MemoryProgressStore, station::Station};

    use super::*;

    const RATE_LIMIT: Duration = Duration::from_secs(20);

    /// Station `i` sits at longitude `i`, so a request reveals which windows it covers.
    fn stations(n: usize) -> Vec<Station> {
        (0..n)
            .map(|i| Station::new(format!("s{i}"), 0.0, i as f64))
            .collect()
    }

    fn distance(from: usize, to: usize) -> f64 {
        if from == to {
            0.0
        } else {
            (from * 1000 + to) as f64 + 0.5
        }
    }

    fn expected_matrix(n: usize) -> DistanceMatrix {
        DistanceMatrix::from_rows(
            (0..n)
                .map(|from| (0..n).map(|to| distance(from, to)).collect())
                .collect(),
        )
        .unwrap()
    }

    fn window_of(points: &[GHPoint]) -> IndexWindow {
        let start = points[0][0] as usize;
        IndexWindow::new(start, start + points.len())
    }

    #[derive(Default)]
    struct ScriptedClient {
        calls: Mutex<Vec<(IndexWindow, IndexWindow)>>,
        failing: Vec<(IndexWindow, IndexWindow)>,
    }

    impl ScriptedClient {
        fn failing(failing: Vec<(IndexWindow, IndexWindow)>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing,
            }
        }

        fn calls(&self) -> Vec<(IndexWindow, IndexWindow)> {
            self.calls.lock().clone()
        }
    }

    impl MatrixClient for ScriptedClient {
        async fn request_sub_matrix(
            &self,
            origins: &[GHPoint],
            destinations: &[GHPoint],
            _profile: GraphHopperProfile,
        ) -> anyhow::Result<Vec<Vec<f64>>> {
            let origin = window_of(origins);
            let destination = window_of(destinations);
            self.calls.lock().push((origin, destination));

            if self.failing.contains(&(origin, destination)) {
                return Err(anyhow::anyhow!("API error: 500 - Internal Server Error"));
            }

            Ok(origin
                .indices()
                .map(|from| destination.indices().map(|to| distance(from, to)).collect())
                .collect())
        }
    }

    /// Keeps every saved state, to replay a run interrupted at any point.
    #[derive(Default)]
    struct RecordingStore {
        history: Mutex<Vec<Progress>>,
    }

    impl ProgressStore for RecordingStore {
        fn load(&self) -> Option<Progress> {
            self.history.lock().last().cloned()
        }

        fn save(&self, progress: &Progress) -> Result<(), MatrixError> {
            self.history.lock().push(progress.clone());
            Ok(())
        }

        fn clear(&self) -> Result<(), MatrixError> {
            self.history.lock().clear();
            Ok(())
        }
    }

    fn params(window_size: usize) -> AssemblerParams {
        AssemblerParams {
            window_size,
            rate_limit: RATE_LIMIT,
            profile: GraphHopperProfile::Bike,
            retry_failed: false,
        }
    }

    fn w(start: usize, end: usize) -> IndexWindow {
        IndexWindow::new(start, end)
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_stations_issue_four_requests() {
        let assembler = MatrixAssembler::new(
            params(2),
            ScriptedClient::default(),
            MemoryProgressStore::default(),
        );

        let start = tokio::time::Instant::now();
        let run = assembler.run(&stations(3)).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(
            assembler.client().calls(),
            vec![
                (w(0, 2), w(0, 2)),
                (w(0, 2), w(2, 3)),
                (w(2, 3), w(0, 2)),
                (w(2, 3), w(2, 3)),
            ]
        );
        assert_eq!(run.requests_issued, 4);
        assert_eq!(elapsed, RATE_LIMIT * 4);
        assert_eq!(run.matrix, expected_matrix(3));
        assert!(run.is_complete());

        // one save per request, one per completed origin window
        assert_eq!(assembler.store().save_count(), 6);
        let saved = assembler.store().progress().unwrap();
        assert_eq!(saved.completed.len(), 2);
        assert_eq!(saved.matrix, expected_matrix(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_stations() {
        let assembler = MatrixAssembler::new(
            params(80),
            ScriptedClient::default(),
            MemoryProgressStore::default(),
        );

        let run = assembler.run(&stations(0)).await.unwrap();

        assert!(run.matrix.is_empty());
        assert_eq!(run.requests_issued, 0);
        assert!(assembler.client().calls().is_empty());
        assert_eq!(assembler.store().save_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_window_size_is_fatal() {
        let assembler = MatrixAssembler::new(
            params(0),
            ScriptedClient::default(),
            MemoryProgressStore::default(),
        );

        let result = assembler.run(&stations(3)).await;

        assert!(matches!(result, Err(MatrixError::InvalidArgument(_))));
        assert!(assembler.client().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_completed_origin_windows() {
        let mut progress = Progress::new(3);
        progress
            .matrix
            .write_block(
                w(0, 2),
                w(0, 3),
                &[
                    vec![distance(0, 0), distance(0, 1), distance(0, 2)],
                    vec![distance(1, 0), distance(1, 1), distance(1, 2)],
                ],
            )
            .unwrap();
        progress.completed.insert(w(0, 2));

        let assembler = MatrixAssembler::new(
            params(2),
            ScriptedClient::default(),
            MemoryProgressStore::with_progress(progress),
        );

        let start = tokio::time::Instant::now();
        let run = assembler.run(&stations(3)).await.unwrap();

        assert_eq!(
            assembler.client().calls(),
            vec![(w(2, 3), w(0, 2)), (w(2, 3), w(2, 3))]
        );
        assert_eq!(start.elapsed(), RATE_LIMIT * 2);
        assert_eq!(run.skipped_windows, vec![w(0, 2)]);
        assert_eq!(run.matrix, expected_matrix(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_idempotent() {
        let store = MemoryProgressStore::default();
        let first = MatrixAssembler::new(params(2), ScriptedClient::default(), store);
        let first_run = first.run(&stations(5)).await.unwrap();
        assert_eq!(first_run.requests_issued, 9);

        let store = MemoryProgressStore::with_progress(first.store().progress().unwrap());
        let second = MatrixAssembler::new(params(2), ScriptedClient::default(), store);
        let start = tokio::time::Instant::now();
        let second_run = second.run(&stations(5)).await.unwrap();

        assert!(second.client().calls().is_empty());
        assert_eq!(second_run.requests_issued, 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(second_run.matrix, first_run.matrix);
        assert_eq!(second_run.skipped_windows, vec![w(0, 2), w(2, 4), w(4, 5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_interrupted_origin_window_from_start() {
        let baseline = MatrixAssembler::new(
            params(2),
            ScriptedClient::default(),
            RecordingStore::default(),
        );
        let baseline_run = baseline.run(&stations(5)).await.unwrap();

        // last state saved before the second origin window was marked complete
        let interrupted = baseline
            .store()
            .history
            .lock()
            .iter()
            .rev()
            .find(|progress| progress.completed.len() == 1)
            .cloned()
            .unwrap();
        assert!(interrupted.matrix.block_is_set(w(2, 4), w(4, 5)));

        let resumed = MatrixAssembler::new(
            params(2),
            ScriptedClient::default(),
            MemoryProgressStore::with_progress(interrupted),
        );
        let resumed_run = resumed.run(&stations(5)).await.unwrap();

        assert_eq!(
            resumed.client().calls(),
            vec![
                (w(2, 4), w(0, 2)),
                (w(2, 4), w(2, 4)),
                (w(2, 4), w(4, 5)),
                (w(4, 5), w(0, 2)),
                (w(4, 5), w(2, 4)),
                (w(4, 5), w(4, 5)),
            ]
        );
        assert_eq!(resumed_run.matrix, baseline_run.matrix);
        assert_eq!(resumed_run.matrix, expected_matrix(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failure_leaves_single_gap() {
        let assembler = MatrixAssembler::new(
            params(2),
            ScriptedClient::failing(vec![(w(2, 4), w(0, 2))]),
            MemoryProgressStore::default(),
        );

        let start = tokio::time::Instant::now();
        let run = assembler.run(&stations(5)).await.unwrap();

        assert_eq!(run.requests_issued, 9);
        assert_eq!(start.elapsed(), RATE_LIMIT * 9);
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].origin, w(2, 4));
        assert_eq!(run.failures[0].destination, w(0, 2));
        assert!(run.failures[0].cause.contains("500"));
        assert!(!run.is_complete());

        let expected = expected_matrix(5);
        for from in 0..5 {
            for to in 0..5 {
                if w(2, 4).contains(from) && w(0, 2).contains(to) {
                    assert_eq!(run.matrix.get(from, to), None);
                } else {
                    assert_eq!(run.matrix.get(from, to), expected.get(from, to));
                }
            }
        }

        // the window still counts as visited
        let saved = assembler.store().progress().unwrap();
        assert!(saved.completed.contains(&w(2, 4)));
        assert_eq!(saved.failures, run.failures);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_of_retried_windows_are_replaced() {
        let mut progress = Progress::new(3);
        progress.completed.insert(w(0, 2));
        progress.failures.push(BlockFailure {
            origin: w(0, 2),
            destination: w(2, 3),
            cause: String::from("timeout"),
        });
        progress.failures.push(BlockFailure {
            origin: w(2, 3),
            destination: w(0, 2),
            cause: String::from("timeout"),
        });

        let assembler = MatrixAssembler::new(
            params(2),
            ScriptedClient::default(),
            MemoryProgressStore::with_progress(progress),
        );
        let run = assembler.run(&stations(3)).await.unwrap();

        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].origin, w(0, 2));
        assert!(run.matrix.block_is_set(w(2, 3), w(0, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_of_other_size_is_discarded() {
        let mut progress = Progress::new(4);
        progress.completed.insert(w(0, 2));

        let assembler = MatrixAssembler::new(
            params(2),
            ScriptedClient::default(),
            MemoryProgressStore::with_progress(progress),
        );
        let run = assembler.run(&stations(3)).await.unwrap();

        assert_eq!(run.requests_issued, 4);
        assert!(run.skipped_windows.is_empty());
        assert_eq!(run.matrix, expected_matrix(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_every_request() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut assembler = MatrixAssembler::new(
            params(2),
            ScriptedClient::failing(vec![(w(0, 2), w(2, 3))]),
            MemoryProgressStore::default(),
        );
        let sink = Arc::clone(&events);
        assembler.on_block(move |event| sink.lock().push(event.clone()));

        assembler.run(&stations(3)).await.unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].outcome, BlockOutcome::Written);
        assert!(matches!(events[1].outcome, BlockOutcome::Failed(_)));
        assert_eq!(events[3].request, 4);
        assert_eq!(events[3].total_requests, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_runs_before_rate_limit_wait() {
        let seen_at = Arc::new(Mutex::new(Vec::new()));
        let mut assembler = MatrixAssembler::new(
            params(2),
            ScriptedClient::default(),
            MemoryProgressStore::default(),
        );
        let start = tokio::time::Instant::now();
        let sink = Arc::clone(&seen_at);
        assembler.on_block(move |_| sink.lock().push(start.elapsed()));

        assembler.run(&stations(3)).await.unwrap();

        assert_eq!(
            *seen_at.lock(),
            vec![Duration::ZERO, RATE_LIMIT, RATE_LIMIT * 2, RATE_LIMIT * 3]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_from_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let points = stations(3);
        let fingerprint =
            crate::progress::snapshot_fingerprint(&points, 2, GraphHopperProfile::Bike);

        let failing = MatrixAssembler::new(
            params(2),
            ScriptedClient::failing(vec![(w(2, 3), w(2, 3))]),
            crate::progress::FileProgressStore::in_folder(dir.path(), fingerprint),
        );
        let first = failing.run(&points).await.unwrap();
        assert_eq!(first.failures.len(), 1);

        let second = MatrixAssembler::new(
            params(2),
            ScriptedClient::default(),
            crate::progress::FileProgressStore::in_folder(dir.path(), fingerprint),
        );
        let run = second.run(&points).await.unwrap();

        assert!(second.client().calls().is_empty());
        assert_eq!(run.failures, first.failures);
        assert_eq!(run.matrix, first.matrix);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_reprocesses_failed_windows() {
        let dir = tempfile::tempdir().unwrap();
        let points = stations(3);
        let fingerprint =
            crate::progress::snapshot_fingerprint(&points, 2, GraphHopperProfile::Bike);

        let failing = MatrixAssembler::new(
            params(2),
            ScriptedClient::failing(vec![(w(2, 3), w(0, 2))]),
            crate::progress::FileProgressStore::in_folder(dir.path(), fingerprint),
        );
        let first = failing.run(&points).await.unwrap();
        assert_eq!(first.failures.len(), 1);
        assert!(!first.is_complete());

        let retry = MatrixAssembler::new(
            AssemblerParams {
                retry_failed: true,
                ..params(2)
            },
            ScriptedClient::default(),
            crate::progress::FileProgressStore::in_folder(dir.path(), fingerprint),
        );
        let start = tokio::time::Instant::now();
        let run = retry.run(&points).await.unwrap();

        assert_eq!(
            retry.client().calls(),
            vec![(w(2, 3), w(0, 2)), (w(2, 3), w(2, 3))]
        );
        assert_eq!(start.elapsed(), RATE_LIMIT * 2);
        assert_eq!(run.skipped_windows, vec![w(0, 2)]);
        assert!(run.failures.is_empty());
        assert!(run.is_complete());
        assert_eq!(run.matrix, expected_matrix(3));

        let saved = retry.store().read_snapshot().unwrap().unwrap();
        assert!(saved.failed_blocks.is_empty());
        assert_eq!(saved.completed_windows, vec![w(0, 2), w(2, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_without_failures_skips_everything() {
        let store = MemoryProgressStore::default();
        let first = MatrixAssembler::new(params(2), ScriptedClient::default(), store);
        first.run(&stations(3)).await.unwrap();

        let retry = MatrixAssembler::new(
            AssemblerParams {
                retry_failed: true,
                ..params(2)
            },
            ScriptedClient::default(),
            MemoryProgressStore::with_progress(first.store().progress().unwrap()),
        );
        let run = retry.run(&stations(3)).await.unwrap();

        assert!(retry.client().calls().is_empty());
        assert_eq!(run.matrix, expected_matrix(3));
    }

    struct BrokenStore;

    impl ProgressStore for BrokenStore {
        fn load(&self) -> Option<Progress> {
            None
        }

        fn save(&self, _progress: &Progress) -> Result<(), MatrixError> {
            Err(MatrixError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only file system",
            )))
        }

        fn clear(&self) -> Result<(), MatrixError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_errors_do_not_abort_the_run() {
        let assembler = MatrixAssembler::new(params(2), ScriptedClient::default(), BrokenStore);

        let start = tokio::time::Instant::now();
        let run = assembler.run(&stations(5)).await.unwrap();

        assert_eq!(assembler.client().calls().len(), 9);
        assert_eq!(run.requests_issued, 9);
        assert_eq!(start.elapsed(), RATE_LIMIT * 9);
        assert!(run.failures.is_empty());
        assert_eq!(run.matrix, expected_matrix(5));
    }
}
