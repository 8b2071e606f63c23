//! Distribution mapping and sample matrix construction.

pub mod distribution;
pub mod matrix;

pub use distribution::map_to_dist;
pub use matrix::{
    baseline_matrix, create_sample_matrix, create_sensitivity_sample_matrix, create_sobol_c,
    map_sample_matrix_to_distributions, SampleMatrix,
};
