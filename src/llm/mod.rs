//! Hosted language-model clients.

pub mod client;

pub use client::{build_model, ExtractionModel};
