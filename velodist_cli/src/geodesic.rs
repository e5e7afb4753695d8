use std::path::PathBuf;

use clap::Args;
use tracing::info;
use velodist_compare::geodesic::geodesic_matrix;
use velodist_matrix::{
    matrix_csv::write_matrix_file,
    station::{read_stations_file, station_ids},
};

#[derive(Args)]
pub struct GeodesicArgs {
    /// Station table (CSV with ID, lat and lon columns)
    #[arg(short, long)]
    input: PathBuf,

    /// Matrix CSV to write
    #[arg(short, long)]
    output: PathBuf,
}

pub fn run(args: GeodesicArgs) -> anyhow::Result<()> {
    let stations = read_stations_file(&args.input)?;
    info!("Loaded {} stations from {:?}", stations.len(), args.input);

    let matrix = geodesic_matrix(&stations);
    write_matrix_file(&args.output, &station_ids(&stations), &matrix)?;

    info!("Geodesic matrix written to {:?}", args.output);

    Ok(())
}
