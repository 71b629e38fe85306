use quarry_core::messages::{Citation, CitationScope};

use crate::citations::{substitute_citations, trim_partial_token};
use crate::segment::{classify_leading, extract, Leading, Tag};
use crate::steps::{parse_thinking, ParsedThinking};

/// Answer body with citation markers substituted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedBody {
    pub text: String,
    pub citations: Vec<Citation>,
    pub complete: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedError {
    pub text: String,
    pub complete: bool,
}

/// Why a buffer with no recognised section renders nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suppression {
    /// The buffer starts with a fragment of a known tag.
    Pending,
    /// The buffer starts with an unknown `<t…` tag; rendered content is cleared.
    Malformed,
}

/// Structured content derived from one cumulative response buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedAnswer {
    pub error: Option<ParsedError>,
    pub thinking: Option<ParsedThinking>,
    pub answer: Option<ParsedBody>,
    pub suppression: Option<Suppression>,
}

impl ParsedAnswer {
    pub fn has_sections(&self) -> bool {
        self.error.is_some() || self.thinking.is_some() || self.answer.is_some()
    }

    pub fn error_complete(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.complete)
    }

    /// Whether anything should attach to an Answer message.
    pub fn has_answer_content(&self) -> bool {
        self.thinking.is_some() || self.answer.is_some()
    }

    pub(crate) fn classify_unsectioned(&mut self, buffer: &str) {
        if self.has_sections() {
            return;
        }
        self.suppression = match classify_leading(buffer) {
            Leading::Pending => Some(Suppression::Pending),
            Leading::Malformed => Some(Suppression::Malformed),
            Leading::Text | Leading::Known => None,
        };
    }
}

pub(crate) fn parse_error_section(content: &str, complete: bool) -> ParsedError {
    ParsedError {
        text: content.trim().to_string(),
        complete,
    }
}

pub(crate) fn parse_thinking_section(content: &str, complete: bool) -> ParsedThinking {
    let content = if complete { content } else { trim_partial_token(content) };
    parse_thinking(content, complete)
}

pub(crate) fn parse_answer_section(content: &str, complete: bool) -> ParsedBody {
    let content = if complete { content } else { trim_partial_token(content) };
    let sub = substitute_citations(content.trim(), CitationScope::Answer);
    ParsedBody {
        text: sub.text,
        citations: sub.citations,
        complete,
    }
}

/// Parse a full cumulative buffer from scratch.
///
/// Sections are processed in order: a complete `<error>` ends processing;
/// the `<answer>` section is only looked for after a closed `<think>`
/// section (or anywhere when there is none).
pub fn parse_document(buffer: &str) -> ParsedAnswer {
    let mut out = ParsedAnswer::default();

    if let Some(seg) = extract(buffer, Tag::Error) {
        out.error = Some(parse_error_section(seg.content, seg.complete));
        if seg.complete {
            return out;
        }
    }

    let rest = match extract(buffer, Tag::Think) {
        Some(seg) => {
            out.thinking = Some(parse_thinking_section(seg.content, seg.complete));
            if !seg.complete {
                return out;
            }
            seg.remainder
        }
        None => buffer,
    };

    if let Some(seg) = extract(rest, Tag::Answer) {
        out.answer = Some(parse_answer_section(seg.content, seg.complete));
    }

    out.classify_unsectioned(buffer);
    out
}

/// Treat an untagged buffer as the answer body. Used when a stream completes
/// without any recognised section.
pub fn parse_bare(buffer: &str) -> ParsedBody {
    parse_answer_section(buffer, true)
}
