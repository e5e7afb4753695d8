use std::{fmt::Display, str::FromStr, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::matrix_client::MatrixClient;

/// `[longitude, latitude]`, the point order GraphHopper expects.
pub type GHPoint = [f64; 2];

#[derive(Deserialize, Serialize, JsonSchema, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GraphHopperProfile {
    Car,
    Bike,
    Foot,
    SmallTruck,
    Truck,
    Mtb,
    Racingbike,
}

impl Display for GraphHopperProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                GraphHopperProfile::Car => "car",
                GraphHopperProfile::Bike => "bike",
                GraphHopperProfile::Foot => "foot",
                GraphHopperProfile::SmallTruck => "small_truck",
                GraphHopperProfile::Truck => "truck",
                GraphHopperProfile::Mtb => "mtb",
                GraphHopperProfile::Racingbike => "racingbike",
            }
        )
    }
}

impl FromStr for GraphHopperProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "car" => Ok(GraphHopperProfile::Car),
            "bike" => Ok(GraphHopperProfile::Bike),
            "foot" => Ok(GraphHopperProfile::Foot),
            "small_truck" => Ok(GraphHopperProfile::SmallTruck),
            "truck" => Ok(GraphHopperProfile::Truck),
            "mtb" => Ok(GraphHopperProfile::Mtb),
            "racingbike" => Ok(GraphHopperProfile::Racingbike),
            other => Err(format!("Unknown profile: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphHopperError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Unexpected matrix shape: expected {expected_rows}x{expected_cols}, got {rows} rows")]
    Shape {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MatrixRequestBody {
    /// Origins, one matrix row each
    pub from_points: Vec<GHPoint>,

    /// Destinations, one matrix column each
    pub to_points: Vec<GHPoint>,

    /// Which arrays to return: "weights", "times", "distances"
    pub out_arrays: Vec<String>,

    /// Routing profile (e.g., "car", "bike", "foot")
    pub profile: String,

    /// With `false`, unreachable pairs come back as `null` instead of failing the request
    pub fail_fast: bool,
}

#[derive(Deserialize)]
struct MatrixSolution {
    /// Distances in meters, `null` when a pair is unreachable
    distances: Vec<Vec<Option<f64>>>,
}

pub struct GraphhopperMatrixClientParams {
    pub api_key: String,
    pub matrix_url: String,
    pub request_timeout: Duration,
}

pub const GRAPHOPPER_MATRIX_SYNC_API_URL: &str = "https://graphhopper.com/api/1/matrix";

pub struct GraphHopperMatrixClient {
    params: GraphhopperMatrixClientParams,
    client: reqwest::Client,
}

impl GraphHopperMatrixClient {
    pub fn new(params: GraphhopperMatrixClientParams) -> Result<Self, GraphHopperError> {
        let client = reqwest::Client::builder()
            .timeout(params.request_timeout)
            .build()?;

        Ok(Self { params, client })
    }

    pub async fn fetch_matrix(
        &self,
        origins: &[GHPoint],
        destinations: &[GHPoint],
        profile: GraphHopperProfile,
    ) -> Result<Vec<Vec<f64>>, GraphHopperError> {
        let body = MatrixRequestBody {
            from_points: origins.to_vec(),
            to_points: destinations.to_vec(),
            out_arrays: vec!["distances".to_string()],
            profile: profile.to_string(),
            fail_fast: false,
        };

        debug!(
            "GraphHopperApi: Posting {}x{} matrix request",
            origins.len(),
            destinations.len()
        );

        let solution = self.sync_matrix_request(&body).await?;

        if solution.distances.len() != origins.len()
            || solution
                .distances
                .iter()
                .any(|row| row.len() != destinations.len())
        {
            return Err(GraphHopperError::Shape {
                expected_rows: origins.len(),
                expected_cols: destinations.len(),
                rows: solution.distances.len(),
            });
        }

        Ok(solution
            .distances
            .into_iter()
            .map(|row| row.into_iter().map(|d| d.unwrap_or(f64::NAN)).collect())
            .collect())
    }

    async fn sync_matrix_request(
        &self,
        body: &MatrixRequestBody,
    ) -> Result<MatrixSolution, GraphHopperError> {
        let response = self
            .client
            .post(&self.params.matrix_url)
            .query(&[("key", &self.params.api_key)])
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> Result<MatrixSolution, GraphHopperError> {
        if response.status().is_success() {
            let bytes = response.bytes().await?;
            let matrix_solution: MatrixSolution = serde_json::from_slice(&bytes)?;
            Ok(matrix_solution)
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            Err(GraphHopperError::Api { status, message })
        }
    }
}

impl MatrixClient for GraphHopperMatrixClient {
    async fn request_sub_matrix(
        &self,
        origins: &[GHPoint],
        destinations: &[GHPoint],
        profile: GraphHopperProfile,
    ) -> anyhow::Result<Vec<Vec<f64>>> {
        Ok(self.fetch_matrix(origins, destinations, profile).await?)
    }
}
