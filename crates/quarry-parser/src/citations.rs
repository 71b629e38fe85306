use std::sync::LazyLock;

use quarry_core::messages::{Citation, CitationScope};
use regex::Regex;

static CITATION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]\(([^()]+?)::([^)]*)\)").unwrap());

/// An unterminated citation token at the very end of a streamed section.
static PARTIAL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d*(?:\](?:\([^)]*)?)?\z").unwrap());

/// Text with every citation token replaced by its `@n@` marker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Substituted {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Replace `[n](fileKey::chunkText)` tokens with `@n@`, in order, recording
/// one citation per marker position.
pub fn substitute_citations(input: &str, scope: CitationScope) -> Substituted {
    let mut text = String::with_capacity(input.len());
    let mut citations = Vec::new();
    let mut last = 0;

    for caps in CITATION_TOKEN.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        text.push_str(&input[last..whole.start()]);

        let number = &caps[1];
        let position = text.len();
        text.push('@');
        text.push_str(number);
        text.push('@');

        citations.push(Citation::new(scope, number, &caps[2], &caps[3], position));
        last = whole.end();
    }
    text.push_str(&input[last..]);

    Substituted { text, citations }
}

/// Hide a citation token that has not finished streaming.
pub(crate) fn trim_partial_token(content: &str) -> &str {
    match PARTIAL_TOKEN.find(content) {
        Some(m) => &content[..m.start()],
        None => content,
    }
}
