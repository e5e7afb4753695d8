use std::{path::PathBuf, time::Duration};

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use velodist_matrix::{
    assembler::{AssemblerParams, BlockOutcome, MatrixAssembler},
    config::{MatrixConfig, parse_duration},
    graphhopper_api::{GraphHopperMatrixClient, GraphHopperProfile},
    matrix_csv::write_matrix_file,
    progress::{FileProgressStore, ProgressStore, snapshot_fingerprint},
    station::{read_stations_file, station_ids},
};

#[derive(Args)]
pub struct NetworkArgs {
    /// Station table (CSV with ID, lat and lon columns)
    #[arg(short, long)]
    input: PathBuf,

    /// Matrix CSV to write
    #[arg(short, long)]
    output: PathBuf,

    /// Folder holding progress snapshots
    #[arg(long, default_value = ".velodist")]
    snapshot_dir: PathBuf,

    /// Stations per request window
    #[arg(short, long)]
    window_size: Option<usize>,

    /// Wait between requests (e.g., "20.1", "30s", "PT1M")
    #[arg(short, long, value_parser = parse_duration)]
    rate_limit: Option<Duration>,

    #[arg(short, long)]
    profile: Option<GraphHopperProfile>,

    /// Keep the snapshot once the matrix is complete
    #[arg(long)]
    keep_snapshot: bool,

    /// Request again the origin windows that failed in a previous run
    #[arg(long)]
    retry_failed: bool,
}

impl NetworkArgs {
    fn config(&self) -> anyhow::Result<MatrixConfig> {
        let mut config = MatrixConfig::from_env()?;

        if let Some(window_size) = self.window_size {
            config.window_size = window_size;
        }
        if let Some(rate_limit) = self.rate_limit {
            config.rate_limit = rate_limit;
        }
        if let Some(profile) = self.profile {
            config.profile = profile;
        }

        config.validate()?;

        Ok(config)
    }
}

pub async fn run(args: NetworkArgs) -> anyhow::Result<()> {
    let config = args.config()?;

    let stations = read_stations_file(&args.input)?;
    info!("Loaded {} stations from {:?}", stations.len(), args.input);

    std::fs::create_dir_all(&args.snapshot_dir)?;
    let fingerprint = snapshot_fingerprint(&stations, config.window_size, config.profile);
    let store = FileProgressStore::in_folder(&args.snapshot_dir, fingerprint);
    info!("Progress snapshot: {:?}", store.path());

    let client = GraphHopperMatrixClient::new(config.client_params())?;
    let params = AssemblerParams {
        retry_failed: args.retry_failed,
        ..config.assembler_params()
    };
    let mut assembler = MatrixAssembler::new(params, client, store);

    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::default_bar().template("[{bar:40}] {pos}/{len} {msg}")?);

    let observer_bar = bar.clone();
    assembler.on_block(move |event| {
        observer_bar.set_length(event.total_requests as u64);
        observer_bar.set_position(event.request as u64);
        observer_bar.set_message(match &event.outcome {
            BlockOutcome::Written => format!("{} -> {}", event.origin, event.destination),
            BlockOutcome::Failed(_) => format!("{} -> {} failed", event.origin, event.destination),
        });
    });

    let matrix_run = assembler.run(&stations).await?;
    bar.finish_and_clear();

    write_matrix_file(&args.output, &station_ids(&stations), &matrix_run.matrix)?;
    info!(
        "Matrix written to {:?} ({} requests, {} windows resumed)",
        args.output,
        matrix_run.requests_issued,
        matrix_run.skipped_windows.len()
    );

    if matrix_run.failures.is_empty() {
        let unreachable = matrix_run.matrix.unset_count();
        if unreachable > 0 {
            warn!("{} station pairs are unreachable", unreachable);
        }
        if !args.keep_snapshot {
            assembler.store().clear()?;
        }
    } else {
        warn!(
            "{} blocks failed, {} distances unset. Run again with --retry-failed to request them",
            matrix_run.failures.len(),
            matrix_run.matrix.unset_count()
        );
    }

    Ok(())
}
