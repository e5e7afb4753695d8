use std::time::Duration;

use jiff::SpanRelativeTo;

use crate::{
    assembler::AssemblerParams,
    error::MatrixError,
    graphhopper_api::{
        GRAPHOPPER_MATRIX_SYNC_API_URL, GraphHopperProfile, GraphhopperMatrixClientParams,
    },
};

pub const API_KEY_ENV_VAR: &str = "GRAPHHOPPER_API_KEY";
pub const MATRIX_URL_ENV_VAR: &str = "GRAPHHOPPER_MATRIX_URL";
pub const RATE_LIMIT_ENV_VAR: &str = "VELODIST_RATE_LIMIT";
pub const WINDOW_SIZE_ENV_VAR: &str = "VELODIST_WINDOW_SIZE";
pub const PROFILE_ENV_VAR: &str = "VELODIST_PROFILE";
pub const REQUEST_TIMEOUT_ENV_VAR: &str = "VELODIST_REQUEST_TIMEOUT";

pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(20_100);
pub const DEFAULT_WINDOW_SIZE: usize = 80;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything a network matrix run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    pub api_key: String,
    pub matrix_url: String,
    /// Wait after every request, whatever its outcome
    pub rate_limit: Duration,
    /// Stations per request window
    pub window_size: usize,
    pub profile: GraphHopperProfile,
    pub request_timeout: Duration,
}

/// Parses "20.1", "30s", "1m", "PT1H30M"-style durations.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();

    if let Ok(duration) = input.parse::<jiff::SignedDuration>() {
        return Duration::try_from(duration).map_err(|err| err.to_string());
    }

    if let Ok(duration) = input
        .parse::<jiff::Span>()
        .and_then(|span| span.to_duration(SpanRelativeTo::days_are_24_hours()))
    {
        return Duration::try_from(duration).map_err(|err| err.to_string());
    }

    if let Ok(seconds) = input.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Ok(Duration::from_secs_f64(seconds));
        }
    }

    Err(format!("Invalid duration: {input}"))
}

impl MatrixConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            matrix_url: String::from(GRAPHOPPER_MATRIX_SYNC_API_URL),
            rate_limit: DEFAULT_RATE_LIMIT,
            window_size: DEFAULT_WINDOW_SIZE,
            profile: GraphHopperProfile::Bike,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn from_env() -> Result<Self, MatrixError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a variable lookup. Only the API key is
    /// required; every other value falls back to its default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MatrixError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_key = get(API_KEY_ENV_VAR).ok_or(MatrixError::MissingCredential(API_KEY_ENV_VAR))?;
        let mut config = MatrixConfig::new(api_key.trim());

        if let Some(url) = get(MATRIX_URL_ENV_VAR) {
            config.matrix_url = url;
        }

        if let Some(value) = get(RATE_LIMIT_ENV_VAR) {
            config.rate_limit = parse_duration(&value)
                .map_err(|err| MatrixError::InvalidArgument(format!("{RATE_LIMIT_ENV_VAR}: {err}")))?;
        }

        if let Some(value) = get(WINDOW_SIZE_ENV_VAR) {
            config.window_size = value.trim().parse().map_err(|_| {
                MatrixError::InvalidArgument(format!("{WINDOW_SIZE_ENV_VAR}: invalid number {value}"))
            })?;
        }

        if let Some(value) = get(PROFILE_ENV_VAR) {
            config.profile = value
                .parse()
                .map_err(|err| MatrixError::InvalidArgument(format!("{PROFILE_ENV_VAR}: {err}")))?;
        }

        if let Some(value) = get(REQUEST_TIMEOUT_ENV_VAR) {
            config.request_timeout = parse_duration(&value).map_err(|err| {
                MatrixError::InvalidArgument(format!("{REQUEST_TIMEOUT_ENV_VAR}: {err}"))
            })?;
        }

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MatrixError> {
        if self.api_key.trim().is_empty() {
            return Err(MatrixError::MissingCredential(API_KEY_ENV_VAR));
        }

        if self.window_size == 0 {
            return Err(MatrixError::InvalidArgument(String::from(
                "window size must be greater than zero",
            )));
        }

        Ok(())
    }

    pub fn client_params(&self) -> GraphhopperMatrixClientParams {
        GraphhopperMatrixClientParams {
            api_key: self.api_key.clone(),
            matrix_url: self.matrix_url.clone(),
            request_timeout: self.request_timeout,
        }
    }

    pub fn assembler_params(&self) -> AssemblerParams {
        AssemblerParams {
            window_size: self.window_size,
            rate_limit: self.rate_limit,
            profile: self.profile,
            retry_failed: false,
        }
    }
}
