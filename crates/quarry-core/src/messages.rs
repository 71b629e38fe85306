use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Question,
    Answer,
    Error,
}

/// One entry of a session log. Identity is its position in the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub kind: MessageKind,
    /// Question text, rendered answer text (with `@n@` markers) or error text.
    pub text: String,
    pub steps: Vec<ThoughtStep>,
    /// Prose inside the thinking block that precedes step 1.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub thinking_preamble: String,
    pub thinking_complete: bool,
    pub answer_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub progress_text: Option<String>,
    pub sourcing_steps: Vec<String>,
    pub sub_sources: BTreeMap<String, SourceInfo>,
    pub citations: Vec<Citation>,
    pub batches: Vec<Batch>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn empty(kind: MessageKind, text: String) -> Self {
        Self {
            kind,
            text,
            steps: Vec::new(),
            thinking_preamble: String::new(),
            thinking_complete: false,
            answer_complete: false,
            progress_text: None,
            sourcing_steps: Vec::new(),
            sub_sources: BTreeMap::new(),
            citations: Vec::new(),
            batches: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn question(text: impl Into<String>) -> Self {
        Self::empty(MessageKind::Question, text.into())
    }

    pub fn answer() -> Self {
        Self::empty(MessageKind::Answer, String::new())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::empty(MessageKind::Error, text.into())
    }

    pub fn is_question(&self) -> bool {
        self.kind == MessageKind::Question
    }

    pub fn is_answer(&self) -> bool {
        self.kind == MessageKind::Answer
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }

    /// Whether the answer carries any parsed or side-channel content.
    pub fn has_content(&self) -> bool {
        !self.text.is_empty()
            || !self.steps.is_empty()
            || !self.thinking_preamble.is_empty()
            || !self.sourcing_steps.is_empty()
            || !self.batches.is_empty()
    }

    /// Drop everything the tag parser derived. Side-channel data stays.
    pub fn clear_parsed(&mut self) {
        self.text.clear();
        self.steps.clear();
        self.thinking_preamble.clear();
        self.citations.clear();
        self.thinking_complete = false;
        self.answer_complete = false;
    }

    pub fn active_batch(&self) -> Option<&Batch> {
        self.batches.iter().find(|b| b.is_active)
    }

    /// Push a new active batch. Any previously active batch is deactivated,
    /// so at most one batch per message is ever active.
    pub fn start_batch(&mut self, step_number: u32, total_steps: u32, description: impl Into<String>) {
        self.deactivate_batches();
        self.batches.push(Batch {
            step_number,
            total_steps,
            description: description.into(),
            sources: BTreeMap::new(),
            is_active: true,
        });
    }

    pub fn deactivate_batches(&mut self) {
        for batch in &mut self.batches {
            batch.is_active = false;
        }
    }

    /// Attach a source to the currently active batch, if any.
    pub fn add_batch_source(&mut self, display_name: impl Into<String>, file_key: impl Into<String>) {
        if let Some(batch) = self.batches.iter_mut().find(|b| b.is_active) {
            let _ = batch.sources.insert(display_name.into(), file_key.into());
        }
    }

    pub fn merge_sources(&mut self, sources: BTreeMap<String, SourceInfo>) {
        self.sub_sources.extend(sources);
    }

    /// Look up a citation by id across the answer body and every step.
    pub fn find_citation(&self, id: &str) -> Option<&Citation> {
        self.citations
            .iter()
            .chain(self.steps.iter().flat_map(|s| s.citations.iter()))
            .find(|c| c.id == id)
    }
}

/// One numbered reasoning step. Numbers are 1-based and contiguous.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThoughtStep {
    pub number: u32,
    pub content: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// Which part of an answer a citation belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "step", rename_all = "snake_case")]
pub enum CitationScope {
    Step(u32),
    Answer,
}

impl CitationScope {
    pub fn label(&self) -> String {
        match self {
            Self::Step(n) => format!("step-{n}"),
            Self::Answer => "answer".to_string(),
        }
    }
}

/// A `[n](fileKey::chunkText)` token, replaced in the text by `@n@`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Unique per `(scope, position)`.
    pub id: String,
    pub scope: CitationScope,
    /// The `n` of the token, as written by the backend.
    pub step_number: String,
    pub file_key: String,
    pub chunk_text: String,
    /// Byte offset of the `@n@` marker in the rewritten text.
    pub position: usize,
}

impl Citation {
    pub fn new(
        scope: CitationScope,
        step_number: impl Into<String>,
        file_key: impl Into<String>,
        chunk_text: impl Into<String>,
        position: usize,
    ) -> Self {
        Self {
            id: format!("{}:{position}", scope.label()),
            scope,
            step_number: step_number.into(),
            file_key: file_key.into(),
            chunk_text: chunk_text.into(),
            position,
        }
    }

    pub fn marker(&self) -> String {
        format!("@{}@", self.step_number)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// Per-file retrieval metadata reported by `status` and `response` frames.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceInfo {
    pub page: Option<u32>,
    pub bounding_box: Option<BoundingBox>,
    pub chunk_title: Option<String>,
    pub is_secondary: Option<bool>,
    pub kg_properties: Option<serde_json::Value>,
    pub page_num: Option<u32>,
}

/// One reported unit of backend retrieval/reasoning work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub step_number: u32,
    pub total_steps: u32,
    pub description: String,
    /// Display name → file key.
    pub sources: BTreeMap<String, String>,
    pub is_active: bool,
}
