use tracing::trace;

use crate::document::{parse_answer_section, parse_error_section, parse_thinking_section, ParsedAnswer, ParsedBody};
use crate::segment::{extract, Tag};
use crate::steps::ParsedThinking;

/// What is known about the settled prefix of the buffer.
#[derive(Clone, Debug)]
enum Settled {
    Nothing,
    /// `<think>` closed at the end of the prefix.
    Thinking(ParsedThinking),
    /// `<answer>` closed after a closed `<think>`.
    Answered {
        thinking: ParsedThinking,
        answer: ParsedBody,
    },
    /// A closed `<error>` section; nothing after it matters.
    Final(ParsedAnswer),
}

/// Stateful parser for one answer stream.
///
/// Every call receives the whole cumulative buffer. Sections that have
/// closed are cached together with the prefix they were derived from; while
/// later buffers extend that prefix only the open tail is re-tokenized. A
/// buffer that does not extend the cached prefix triggers a full re-scan.
/// Output always equals [`crate::parse_document`] on the same buffer.
#[derive(Debug)]
pub struct IncrementalParser {
    settled_prefix: String,
    settled: Settled,
    cycles: u64,
    rescans: u64,
}

impl Default for IncrementalParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalParser {
    pub fn new() -> Self {
        Self {
            settled_prefix: String::new(),
            settled: Settled::Nothing,
            cycles: 0,
            rescans: 0,
        }
    }

    /// Number of parse calls so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Number of times the cache was discarded because the buffer changed
    /// underneath it.
    pub fn rescans(&self) -> u64 {
        self.rescans
    }

    /// Length of the buffer prefix that no longer needs tokenizing.
    pub fn settled_len(&self) -> usize {
        self.settled_prefix.len()
    }

    pub fn reset(&mut self) {
        self.settled_prefix.clear();
        self.settled = Settled::Nothing;
    }

    pub fn parse(&mut self, buffer: &str) -> ParsedAnswer {
        self.cycles += 1;

        if !buffer.starts_with(self.settled_prefix.as_str()) {
            trace!(settled = self.settled_prefix.len(), len = buffer.len(), "buffer diverged, re-scanning");
            self.rescans += 1;
            self.reset();
        }

        if let Settled::Final(parsed) = &self.settled {
            return parsed.clone();
        }

        let mut out = ParsedAnswer::default();

        // The first error section may open anywhere, including inside text
        // that is already settled, so it is always searched in full.
        if let Some(seg) = extract(buffer, Tag::Error) {
            out.error = Some(parse_error_section(seg.content, seg.complete));
            if seg.complete {
                self.settle(buffer, seg.end, Settled::Final(out.clone()));
                return out;
            }
        }

        let rest_start = match &self.settled {
            Settled::Answered { thinking, answer } => {
                out.thinking = Some(thinking.clone());
                out.answer = Some(answer.clone());
                return out;
            }
            Settled::Thinking(thinking) => {
                out.thinking = Some(thinking.clone());
                self.settled_prefix.len()
            }
            Settled::Nothing | Settled::Final(_) => match extract(buffer, Tag::Think) {
                Some(seg) => {
                    let thinking = parse_thinking_section(seg.content, seg.complete);
                    out.thinking = Some(thinking.clone());
                    if !seg.complete {
                        return out;
                    }
                    self.settle(buffer, seg.end, Settled::Thinking(thinking));
                    seg.end
                }
                None => 0,
            },
        };

        if let Some(seg) = extract(&buffer[rest_start..], Tag::Answer) {
            let answer = parse_answer_section(seg.content, seg.complete);
            out.answer = Some(answer.clone());
            // Without a closed `<think>` a later one still takes over the
            // document, so only an answer that follows one can settle.
            if let (Some(thinking), true) = (&out.thinking, seg.complete) {
                let thinking = thinking.clone();
                self.settle(buffer, rest_start + seg.end, Settled::Answered { thinking, answer });
            }
        }

        out.classify_unsectioned(buffer);
        out
    }

    fn settle(&mut self, buffer: &str, end: usize, settled: Settled) {
        self.settled_prefix.clear();
        self.settled_prefix.push_str(&buffer[..end]);
        self.settled = settled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;
    use proptest::prelude::*;

    const DOC: &str = "<think>Plan first.\n1. Searching docs [1](a.pdf::p1)\n2. Reading\n5. aside\n</think>\
                       <answer>See [1](lease.pdf::sec4) for terms and [2](b.pdf::x).</answer>";

    fn stream_in_chunks(doc: &str, cuts: &[usize]) -> Vec<(String, ParsedAnswer)> {
        let mut parser = IncrementalParser::new();
        let mut buffer = String::new();
        let mut last = 0;
        let mut out = Vec::new();
        for &cut in cuts.iter().chain(std::iter::once(&doc.len())) {
            if cut <= last || !doc.is_char_boundary(cut) {
                continue;
            }
            buffer.push_str(&doc[last..cut]);
            last = cut;
            out.push((buffer.clone(), parser.parse(&buffer)));
        }
        out
    }

    #[test]
    fn byte_by_byte_matches_full_parse() {
        let cuts: Vec<usize> = (1..DOC.len()).collect();
        for (buffer, parsed) in stream_in_chunks(DOC, &cuts) {
            assert_eq!(parsed, parse_document(&buffer), "diverged at {buffer:?}");
        }
    }

    #[test]
    fn closed_sections_are_settled() {
        let mut parser = IncrementalParser::new();
        let first = parser.parse("<think>1. a</think><answer>b");
        assert_eq!(parser.settled_len(), "<think>1. a</think>".len());
        assert_eq!(first.answer.as_ref().unwrap().text, "b");

        let second = parser.parse("<think>1. a</think><answer>b</answer>");
        assert!(second.answer.unwrap().complete);
        assert_eq!(parser.settled_len(), "<think>1. a</think><answer>b</answer>".len());
        assert_eq!(parser.rescans(), 0);
    }

    #[test]
    fn same_buffer_twice_is_identical() {
        let mut parser = IncrementalParser::new();
        let a = parser.parse(DOC);
        let b = parser.parse(DOC);
        assert_eq!(a, b);
        assert_eq!(a.thinking.as_ref().unwrap().steps.len(), 2);
        assert_eq!(a.answer.as_ref().unwrap().citations.len(), 2);
        assert_eq!(parser.cycles(), 2);
    }

    #[test]
    fn diverging_buffer_falls_back_to_full_scan() {
        let mut parser = IncrementalParser::new();
        let _ = parser.parse("<think>1. a</think>");
        let parsed = parser.parse("<think>1. z</think><answer>ok</answer>");
        assert_eq!(parser.rescans(), 1);
        assert_eq!(parsed, parse_document("<think>1. z</think><answer>ok</answer>"));
    }

    #[test]
    fn late_error_after_answer_is_reported() {
        let mut parser = IncrementalParser::new();
        let _ = parser.parse("<answer>done</answer>");
        let parsed = parser.parse("<answer>done</answer><error>late failure</error>");
        assert!(parsed.error_complete());
        assert_eq!(parsed, parse_document("<answer>done</answer><error>late failure</error>"));
    }

    #[test]
    fn think_opening_after_bare_answer_takes_over() {
        let mut parser = IncrementalParser::new();
        let first = parser.parse("<answer>x</answer>");
        assert_eq!(first.answer.as_ref().unwrap().text, "x");
        assert_eq!(parser.settled_len(), 0);

        let buffer = "<answer>x</answer><think>1. late";
        let later = parser.parse(buffer);
        assert_eq!(later, parse_document(buffer));
        assert!(later.answer.is_none());
        assert_eq!(later.thinking.as_ref().unwrap().steps.len(), 1);
    }

    #[test]
    fn closed_error_is_final() {
        let mut parser = IncrementalParser::new();
        let first = parser.parse("<error>nope</error>");
        let later = parser.parse("<error>nope</error><answer>x</answer>");
        assert_eq!(first, later);
        assert_eq!(later, parse_document("<error>nope</error><answer>x</answer>"));
    }

    proptest! {
        #[test]
        fn any_chunking_matches_full_parse(mut cuts in proptest::collection::vec(0usize..DOC.len(), 0..24)) {
            cuts.sort_unstable();
            for (buffer, parsed) in stream_in_chunks(DOC, &cuts) {
                prop_assert_eq!(parsed, parse_document(&buffer));
            }
        }

        #[test]
        fn arbitrary_text_matches_full_parse(
            parts in proptest::collection::vec(
                prop_oneof![
                    Just("<think>".to_string()),
                    Just("</think>".to_string()),
                    Just("<answer>".to_string()),
                    Just("</answer>".to_string()),
                    Just("<error>".to_string()),
                    Just("</error>".to_string()),
                    Just("1. ".to_string()),
                    Just("2. ".to_string()),
                    Just("\n".to_string()),
                    Just("[1](f.pdf::c)".to_string()),
                    "[a-z ]{0,6}",
                ],
                0..16,
            )
        ) {
            let mut parser = IncrementalParser::new();
            let mut buffer = String::new();
            for part in parts {
                buffer.push_str(&part);
                prop_assert_eq!(parser.parse(&buffer), parse_document(&buffer));
            }
        }
    }
}
