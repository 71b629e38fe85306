use std::sync::Arc;

use quarry_core::errors::ClientError;
use quarry_core::ids::ThreadId;
use quarry_core::protocol::{BatchFrame, BatchItem, ProgressFrame, StatusFrame};
use quarry_parser::{parse_bare, IncrementalParser, ParsedAnswer, Suppression};
use quarry_telemetry::StreamMetrics;
use tracing::{debug, trace, warn};

use crate::coalescer::ResponseChunk;
use crate::collaborators::FileResolver;
use crate::session::{QueryState, SessionContext};

/// Per-query accumulator: the cumulative response buffer, its parser, and
/// the session slots this query writes to.
pub struct AnswerStream {
    buffer: String,
    parser: IncrementalParser,
    answer_index: Option<usize>,
    error_index: Option<usize>,
    resolver: Arc<dyn FileResolver>,
    metrics: Arc<StreamMetrics>,
}

impl AnswerStream {
    pub fn new(resolver: Arc<dyn FileResolver>, metrics: Arc<StreamMetrics>) -> Self {
        Self {
            buffer: String::new(),
            parser: IncrementalParser::new(),
            answer_index: None,
            error_index: None,
            resolver,
            metrics,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Append one coalesced update and re-derive the structured answer.
    pub fn apply_chunk(&mut self, session: &mut SessionContext, chunk: ResponseChunk) {
        if let Some(thread_id) = chunk.thread_id {
            session.set_thread_id(ThreadId::from_raw(thread_id));
        }
        if !chunk.sources.is_empty() {
            let index = self.answer_slot(session);
            let _ = session.update_message(index, |m| m.merge_sources(chunk.sources));
        }
        if chunk.text.is_empty() {
            return;
        }

        self.buffer.push_str(&chunk.text);
        let parsed = self.parser.parse(&self.buffer);
        self.metrics.record_parse_cycle();
        self.apply_parsed(session, &parsed);
    }

    pub fn apply_progress(&mut self, session: &mut SessionContext, frame: &ProgressFrame) {
        let Some(text) = frame.text() else { return };
        let index = self.answer_slot(session);
        let _ = session.update_message(index, |m| {
            if m.sourcing_steps.last().map(String::as_str) != Some(text) {
                m.sourcing_steps.push(text.to_string());
            }
            m.progress_text = Some(text.to_string());
        });
    }

    pub fn apply_status(&mut self, session: &mut SessionContext, frame: &StatusFrame) {
        let message = frame.message.as_deref().filter(|m| !m.trim().is_empty());
        let sources = frame.sources.clone().unwrap_or_default();
        if message.is_none() && sources.is_empty() {
            return;
        }

        let named: Vec<(String, String)> = sources
            .keys()
            .map(|key| (self.resolver.resolve_file_name(key), key.clone()))
            .collect();
        let index = self.answer_slot(session);
        let _ = session.update_message(index, |m| {
            if let Some(text) = message {
                m.progress_text = Some(text.to_string());
            }
            for (display_name, file_key) in named {
                m.add_batch_source(display_name, file_key);
            }
            m.merge_sources(sources);
        });
    }

    pub fn apply_batch(&mut self, session: &mut SessionContext, frame: &BatchFrame) {
        let steps: Vec<_> = frame
            .items
            .iter()
            .filter_map(|item| match item {
                BatchItem::StepStart {
                    step_number,
                    total_steps,
                    description,
                } => Some((*step_number, *total_steps, description.clone())),
                BatchItem::Other => None,
            })
            .collect();
        if steps.is_empty() {
            return;
        }

        let index = self.answer_slot(session);
        let _ = session.update_message(index, |m| {
            for (step, total, description) in steps {
                m.start_batch(step, total, description);
            }
        });
    }

    /// Terminal `complete`. Untagged text becomes the answer body, batches
    /// are closed, and the session decides between `Complete` and `Errored`.
    pub fn finish(&mut self, session: &mut SessionContext) -> QueryState {
        let parsed = self.parser.parse(&self.buffer);
        let bare = !parsed.has_sections() && parsed.suppression.is_none() && !self.buffer.trim().is_empty();
        if bare {
            debug!(len = self.buffer.len(), "no sections in response, using text as answer");
            let body = parse_bare(&self.buffer);
            let index = self.answer_slot(session);
            let _ = session.update_message(index, |m| {
                m.text = body.text;
                m.citations = body.citations;
                m.answer_complete = true;
            });
        }

        if self.buffer.trim().is_empty() && self.answer_index.is_none() && self.error_index.is_none() {
            warn!("stream completed without content");
        }
        self.close_answer(session);

        let state = session.complete();
        match state {
            QueryState::Errored => self.metrics.record_failed(),
            _ => self.metrics.record_completed(),
        }
        state
    }

    /// Terminal error frame or lost connection.
    pub fn fail(&mut self, session: &mut SessionContext, error: &ClientError) {
        warn!(error_kind = error.error_kind(), error = %error, "query failed");
        self.close_answer(session);
        session.fail(error);
        self.metrics.record_failed();
    }

    fn close_answer(&self, session: &mut SessionContext) {
        if let Some(index) = self.answer_index {
            let _ = session.update_message(index, |m| {
                m.deactivate_batches();
                m.progress_text = None;
            });
        }
    }

    fn answer_slot(&mut self, session: &mut SessionContext) -> usize {
        *self.answer_index.get_or_insert_with(|| session.ensure_answer())
    }

    fn apply_parsed(&mut self, session: &mut SessionContext, parsed: &ParsedAnswer) {
        if let Some(error) = &parsed.error {
            if !error.text.is_empty() || error.complete {
                let text = if error.text.is_empty() { "Unknown error" } else { error.text.as_str() };
                match self.error_index {
                    Some(index) => {
                        let _ = session.update_message(index, |m| m.text = text.to_string());
                    }
                    None => self.error_index = Some(session.upsert_error(text)),
                }
            }
        }

        if parsed.has_answer_content() {
            let index = self.answer_slot(session);
            let _ = session.update_message(index, |m| {
                if let Some(thinking) = &parsed.thinking {
                    m.thinking_preamble.clone_from(&thinking.preamble);
                    m.steps.clone_from(&thinking.steps);
                    m.thinking_complete = thinking.complete;
                }
                if let Some(answer) = &parsed.answer {
                    m.text.clone_from(&answer.text);
                    m.citations.clone_from(&answer.citations);
                    m.answer_complete = answer.complete;
                }
            });
        }

        match parsed.suppression {
            Some(Suppression::Malformed) => {
                debug!("unexpected leading tag, clearing rendered content");
                if let Some(index) = self.answer_index {
                    let _ = session.update_message(index, |m| m.clear_parsed());
                }
            }
            Some(Suppression::Pending) => trace!("leading tag fragment, waiting for more text"),
            None => {}
        }
    }
}
