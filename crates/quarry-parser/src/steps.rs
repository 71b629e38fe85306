use std::sync::LazyLock;

use quarry_core::messages::{CitationScope, ThoughtStep};
use regex::Regex;

use crate::citations::substitute_citations;

static STEP_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\.\s+(.*)$").unwrap());

/// Structured form of a `<think>` section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedThinking {
    /// Prose before step 1, citations left as written.
    pub preamble: String,
    pub steps: Vec<ThoughtStep>,
    pub complete: bool,
}

/// Split a thinking section into numbered steps.
///
/// A line `N. text` opens a new step only when `N` is exactly one more than
/// the current step number. Any other line, including out-of-sequence
/// numbered lines, continues the current step.
pub fn parse_thinking(section: &str, complete: bool) -> ParsedThinking {
    let mut preamble: Vec<&str> = Vec::new();
    let mut raw_steps: Vec<(u32, Vec<&str>)> = Vec::new();

    for line in section.lines() {
        let line = line.trim();
        let current = raw_steps.last().map_or(0, |(n, _)| *n);

        if let Some(caps) = STEP_LINE.captures(line) {
            if caps[1].parse::<u32>().ok() == Some(current + 1) {
                let first = caps.get(2).map_or("", |m| m.as_str());
                raw_steps.push((current + 1, vec![first]));
                continue;
            }
        }
        if line.is_empty() {
            continue;
        }
        match raw_steps.last_mut() {
            Some((_, lines)) => lines.push(line),
            None => preamble.push(line),
        }
    }

    let steps = raw_steps
        .into_iter()
        .map(|(number, lines)| {
            let joined = lines.join("\n");
            let sub = substitute_citations(joined.trim(), CitationScope::Step(number));
            ThoughtStep {
                number,
                content: sub.text,
                citations: sub.citations,
            }
        })
        .collect();

    ParsedThinking {
        preamble: preamble.join("\n"),
        steps,
        complete,
    }
}
