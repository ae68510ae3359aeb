pub mod expense;
pub mod extraction;
pub mod message;

pub use expense::{Expense, ExpenseStatus, NewExpense};
pub use extraction::{ExtractedData, LineItem};
pub use message::{ResultMessage, ResultStatus, SubmissionMessage};
