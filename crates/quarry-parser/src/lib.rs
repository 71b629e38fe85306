//! Incremental parser for streamed answer documents.
//!
//! A response is a growing text buffer carrying `<think>`, `<answer>` and
//! `<error>` sections, numbered reasoning steps and inline
//! `[n](fileKey::chunkText)` citation tokens. [`parse_document`] derives the
//! structured form from scratch; [`IncrementalParser`] produces the same
//! output while only re-tokenizing the part of the buffer that can still
//! change.

pub mod citations;
pub mod document;
pub mod incremental;
pub mod segment;
pub mod steps;

pub use citations::{substitute_citations, Substituted};
pub use document::{parse_bare, parse_document, ParsedAnswer, ParsedBody, ParsedError, Suppression};
pub use incremental::IncrementalParser;
pub use segment::{extract, Segment, Tag};
pub use steps::{parse_thinking, ParsedThinking};
