pub mod assembler;
pub mod config;
pub mod coordinates;
pub mod distance_matrix;
pub mod error;
pub mod graphhopper_api;
pub mod matrix_client;
pub mod matrix_csv;
pub mod progress;
pub mod station;
pub mod window;
