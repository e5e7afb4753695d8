pub mod comparison;
pub mod geodesic;
mod student_t;
