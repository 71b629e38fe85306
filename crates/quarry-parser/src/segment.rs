/// Section tags understood by the answer parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    Think,
    Answer,
    Error,
}

impl Tag {
    pub const ALL: [Tag; 3] = [Tag::Think, Tag::Answer, Tag::Error];

    pub fn open(self) -> &'static str {
        match self {
            Self::Think => "<think>",
            Self::Answer => "<answer>",
            Self::Error => "<error>",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            Self::Think => "</think>",
            Self::Answer => "</answer>",
            Self::Error => "</error>",
        }
    }
}

/// One extracted section of a response buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Inner text. For an open section this is provisional and excludes a
    /// trailing fragment of the close tag.
    pub content: &'a str,
    pub complete: bool,
    /// Offset just past the close tag, or the buffer length while open.
    pub end: usize,
    /// Text after the close tag. Empty while the section is open.
    pub remainder: &'a str,
}

/// Extract the first `tag` section of `text`.
///
/// Returns `None` when the open tag is absent. Without a close tag the
/// section is incomplete and everything after the open tag is returned.
pub fn extract(text: &str, tag: Tag) -> Option<Segment<'_>> {
    let open_at = text.find(tag.open())?;
    let content_start = open_at + tag.open().len();
    let after_open = &text[content_start..];

    match after_open.find(tag.close()) {
        Some(rel) => {
            let end = content_start + rel + tag.close().len();
            Some(Segment {
                content: &after_open[..rel],
                complete: true,
                end,
                remainder: &text[end..],
            })
        }
        None => Some(Segment {
            content: strip_partial_suffix(after_open, tag.close()),
            complete: false,
            end: text.len(),
            remainder: "",
        }),
    }
}

/// Drop a trailing proper prefix of `marker` (e.g. `</ans` for `</answer>`).
pub(crate) fn strip_partial_suffix<'a>(content: &'a str, marker: &str) -> &'a str {
    for len in (1..marker.len()).rev() {
        if content.ends_with(&marker[..len]) {
            return &content[..content.len() - len];
        }
    }
    content
}

/// How the start of a buffer relates to the known section tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Leading {
    /// Plain text, or markup that is not ours.
    Text,
    /// Starts with a complete known open tag.
    Known,
    /// A fragment that may still grow into a known open tag.
    Pending,
    /// Looks like a tag (`<t…`) but matches none of ours.
    Malformed,
}

pub(crate) fn classify_leading(text: &str) -> Leading {
    let t = text.trim_start();
    if !t.starts_with('<') {
        return Leading::Text;
    }
    for tag in Tag::ALL {
        if t.starts_with(tag.open()) {
            return Leading::Known;
        }
        if tag.open().starts_with(t) {
            return Leading::Pending;
        }
    }
    if t.starts_with("<t") {
        Leading::Malformed
    } else {
        Leading::Text
    }
}
