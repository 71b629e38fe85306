use std::fmt::Write as _;
use std::io::Write as _;

use parking_lot::Mutex;
use quarry_client::{ActivatedSource, FileResolver, SessionObserver};
use quarry_core::messages::Message;

/// Streams progress lines to stderr while a query runs.
#[derive(Default)]
pub struct ProgressPrinter {
    /// `(message index, sourcing steps already printed)`.
    printed: Mutex<(usize, usize)>,
}

impl SessionObserver for ProgressPrinter {
    fn on_session_messages_changed(&self, messages: &[Message]) {
        let Some((index, message)) = messages.iter().enumerate().rev().find(|(_, m)| m.is_answer()) else {
            return;
        };
        let mut printed = self.printed.lock();
        if printed.0 != index {
            *printed = (index, 0);
        }
        let mut stderr = std::io::stderr().lock();
        for step in message.sourcing_steps.iter().skip(printed.1) {
            let _ = writeln!(stderr, "  … {step}");
        }
        printed.1 = message.sourcing_steps.len();
    }

    fn on_source_activated(&self, source: &ActivatedSource) {
        let page = source.page.map(|p| format!(" (page {p})")).unwrap_or_default();
        eprintln!("  → {}{page}: {}", source.display_name, source.chunk_text);
    }
}

/// Plain-text rendering of a finished Answer or Error message.
pub fn render_message(message: &Message, resolver: &dyn FileResolver) -> String {
    let mut out = String::new();
    if message.is_error() {
        let _ = writeln!(out, "error: {}", message.text);
        return out;
    }

    if !message.steps.is_empty() {
        let _ = writeln!(out, "Thinking:");
        for step in &message.steps {
            let mut lines = step.content.lines();
            let _ = writeln!(out, "  {}. {}", step.number, lines.next().unwrap_or_default());
            for line in lines {
                let _ = writeln!(out, "     {line}");
            }
        }
        out.push('\n');
    }

    if !message.text.is_empty() {
        let _ = writeln!(out, "{}", message.text);
    }

    if !message.citations.is_empty() {
        let _ = writeln!(out, "\nSources:");
        for citation in &message.citations {
            let _ = writeln!(
                out,
                "  {} {} :: {}",
                citation.marker(),
                resolver.resolve_file_name(&citation.file_key),
                citation.chunk_text
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_client::BasenameResolver;
    use quarry_core::messages::{Citation, CitationScope, ThoughtStep};

    #[test]
    fn renders_steps_answer_and_sources() {
        let mut message = Message::answer();
        message.steps.push(ThoughtStep {
            number: 1,
            content: "Searching\nmore detail".into(),
            citations: Vec::new(),
        });
        message.text = "See @1@.".into();
        message
            .citations
            .push(Citation::new(CitationScope::Answer, "1", "docs/lease.pdf", "sec4", 4));

        let out = render_message(&message, &BasenameResolver);
        assert_eq!(
            out,
            "Thinking:\n  1. Searching\n     more detail\n\nSee @1@.\n\nSources:\n  @1@ lease.pdf :: sec4\n"
        );
    }

    #[test]
    fn renders_errors() {
        let out = render_message(&Message::error("collection not found"), &BasenameResolver);
        assert_eq!(out, "error: collection not found\n");
    }

    #[test]
    fn progress_printer_tracks_answer_changes() {
        let printer = ProgressPrinter::default();
        let mut answer = Message::answer();
        answer.sourcing_steps.push("Searching".into());
        printer.on_session_messages_changed(&[Message::question("Q"), answer.clone()]);
        assert_eq!(*printer.printed.lock(), (1, 1));

        printer.on_session_messages_changed(&[Message::question("Q"), answer, Message::question("Q2")]);
        assert_eq!(*printer.printed.lock(), (1, 1));
    }
}
