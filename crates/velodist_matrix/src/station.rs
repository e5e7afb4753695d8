use std::{fs::File, io::Read, path::Path};

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Station {
    #[serde(rename = "ID")]
    pub id: String,
    pub lat: f64,
    pub lon: f64,
}

impl Station {
    pub fn new(id: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            id: id.into(),
            lat,
            lon,
        }
    }
}

impl From<&Station> for geo_types::Point {
    fn from(station: &Station) -> Self {
        geo_types::Point::new(station.lon, station.lat)
    }
}

/// Reads a station table with at least the `ID`, `lat` and `lon` columns.
/// Row order defines the station indices.
pub fn read_stations<R: Read>(reader: R) -> Result<Vec<Station>, anyhow::Error> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut stations = Vec::new();

    for (row, record) in rdr.deserialize::<Station>().enumerate() {
        let station =
            record.map_err(|err| anyhow::anyhow!("Invalid station on row {}: {}", row + 1, err))?;
        stations.push(station);
    }

    Ok(stations)
}

pub fn read_stations_file<P: AsRef<Path>>(path: P) -> Result<Vec<Station>, anyhow::Error> {
    let file = File::open(path.as_ref())?;
    read_stations(file)
}

pub fn station_ids(stations: &[Station]) -> Vec<String> {
    stations.iter().map(|station| station.id.clone()).collect()
}
