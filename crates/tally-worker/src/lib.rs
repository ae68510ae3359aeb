//! Tally expense worker
//!
//! `ExpenseWorker` runs the per-message pipeline (archive images, recognize
//! text, extract structured data, persist) and always produces exactly one
//! `ResultMessage`. `run_consumer` drives it from the submission queue, one
//! delivery at a time, settling each delivery only after its result is published.

pub mod consumer;
pub mod pipeline;

pub use consumer::{handle_delivery, run_consumer, ConsumerSettings};
pub use pipeline::ExpenseWorker;
