//! Upload processing pipeline.
//!
//! `intake` accepts files and queues them; `worker` turns each queued file
//! into a stored extraction and report.

pub mod intake;
pub mod worker;

pub use intake::{remove, submit};
pub use worker::WorkerQueue;
