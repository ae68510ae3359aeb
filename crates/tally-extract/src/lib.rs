//! Tally extraction adapters
//!
//! The three pipeline stages that talk to the outside world: archiving receipt
//! images into object storage, text recognition, and structured extraction
//! through a chat-completions model. Every adapter degrades instead of failing:
//! archiver and recognizer return `None`, the extractor returns the empty result.

pub mod archiver;
pub mod extractor;
pub mod normalize;
pub mod prompt;
pub mod recognizer;
pub mod sanitize;

pub use archiver::{HttpImageArchiver, ImageArchiver};
pub use extractor::{LlmStructuredExtractor, StructuredExtractor};
pub use recognizer::{HttpTextRecognizer, TextRecognizer};
