//! Report generation.

pub mod generator;

pub use generator::{
    format_grouped, generate_analysis_report, generate_json_report, NO_DATA_MESSAGE,
};
