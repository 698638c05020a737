//! Incremental extraction and parsing of tagged tool blocks in assistant text.

pub mod extractor;
pub mod parser;

pub use extractor::{ExtractedBlock, IncrementalExtractor, Segment};
pub use parser::{ParsedToolCall, ToolCallParser};
