//! Analysis modules.
//!
//! Aggregation and comparison helpers used by the report generator and
//! the processing pipeline.

pub mod aggregator;

pub use aggregator::*;
