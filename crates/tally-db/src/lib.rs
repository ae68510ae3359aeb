//! Tally Database Layer
//!
//! Persistence for expense records. `ExpenseStore` is the seam the worker and
//! the intake CLI depend on; `ExpenseRepository` backs it with PostgreSQL.

pub mod db;
pub mod store;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use db::{setup_pool, ExpenseRepository};
pub use store::ExpenseStore;

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockExpenseRepository;
