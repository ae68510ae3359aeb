//! Tally Core Library
//!
//! This crate provides the domain models, error types and configuration shared
//! by every Tally component: the expense record and its status state machine,
//! the queue message contracts, and the extraction result shape.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{NackPolicy, WorkerConfig};
pub use error::AppError;
pub use models::{
    Expense, ExpenseStatus, ExtractedData, LineItem, NewExpense, ResultMessage, ResultStatus,
    SubmissionMessage,
};
pub use storage_types::StorageBackend;
