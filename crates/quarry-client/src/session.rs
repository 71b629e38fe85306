//! Conversation view-model.
//!
//! The session owns the ordered message log, the backend thread id and the
//! retry state. All mutation goes through the named methods below.

use chrono::{DateTime, Utc};
use quarry_core::errors::ClientError;
use quarry_core::ids::ThreadId;
use quarry_core::messages::{BoundingBox, Message};
use tracing::debug;

use crate::collaborators::FileResolver;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryState {
    #[default]
    Idle,
    Sent,
    Streaming,
    Complete,
    Errored,
}

impl QueryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Errored)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Sent | Self::Streaming)
    }
}

/// A question and the answer it completed with.
#[derive(Clone, Debug)]
pub struct Exchange {
    pub question: String,
    pub answer: Option<Message>,
    pub thread_id: Option<ThreadId>,
    pub completed_at: DateTime<Utc>,
}

/// A citation resolved for display.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivatedSource {
    pub file_key: String,
    pub chunk_text: String,
    pub display_name: String,
    pub page: Option<u32>,
    pub bounds: Option<BoundingBox>,
}

#[derive(Debug, Default)]
pub struct SessionContext {
    messages: Vec<Message>,
    thread_id: Option<ThreadId>,
    last_query: Option<String>,
    last_error: Option<ClientError>,
    state: QueryState,
    history: Vec<Exchange>,
    /// Index of the first message belonging to the current query's reply.
    reply_start: usize,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn thread_id(&self) -> Option<&ThreadId> {
        self.thread_id.as_ref()
    }

    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    pub fn last_error(&self) -> Option<&ClientError> {
        self.last_error.as_ref()
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    /// Retry is offered after a failure, as long as there is a query to replay.
    pub fn can_retry(&self) -> bool {
        self.state == QueryState::Errored && self.last_query.is_some()
    }

    pub fn add_message(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    pub fn update_last_message(&mut self, f: impl FnOnce(&mut Message)) -> bool {
        match self.messages.last_mut() {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        }
    }

    pub fn update_message(&mut self, index: usize, f: impl FnOnce(&mut Message)) -> bool {
        match self.messages.get_mut(index) {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        }
    }

    /// Index of the Answer for the current query, creating it if the reply
    /// has none yet.
    pub fn ensure_answer(&mut self) -> usize {
        if let Some(index) = self.last_reply_index(Message::is_answer) {
            return index;
        }
        self.add_message(Message::answer())
    }

    /// Set the text of the current query's trailing Error message, creating
    /// one if the last message is anything else.
    pub fn upsert_error(&mut self, text: impl Into<String>) -> usize {
        let text = text.into();
        if let Some(index) = self.last_reply_index(Message::is_error) {
            self.messages[index].text = text;
            return index;
        }
        self.add_message(Message::error(text))
    }

    /// Adopt a backend-assigned thread id. Empty ids are ignored.
    pub fn set_thread_id(&mut self, thread_id: ThreadId) {
        if thread_id.is_empty() {
            return;
        }
        if self.thread_id.as_ref() != Some(&thread_id) {
            debug!(thread_id = %thread_id, "thread id assigned");
            self.thread_id = Some(thread_id);
        }
    }

    /// Start a query. On retry the Question is not appended again when it is
    /// still the most recent Question in the log.
    pub fn begin_query(&mut self, query: &str, is_retry: bool) {
        let repeat = is_retry
            && self
                .messages
                .iter()
                .rev()
                .find(|m| m.is_question())
                .is_some_and(|q| q.text == query);
        if !repeat {
            let _ = self.add_message(Message::question(query));
        }
        self.last_query = Some(query.to_string());
        self.last_error = None;
        self.reply_start = self.messages.len();
        self.state = QueryState::Sent;
    }

    pub fn mark_streaming(&mut self) {
        if self.state == QueryState::Sent {
            self.state = QueryState::Streaming;
        }
    }

    /// Finish the current query. Ends in `Errored` when the reply carries an
    /// Error message, even if metadata later appended an Answer after it;
    /// otherwise records the exchange in history.
    pub fn complete(&mut self) -> QueryState {
        if let Some(index) = self.reply_index(Message::is_error) {
            self.last_error = Some(ClientError::Server(self.messages[index].text.clone()));
            self.state = QueryState::Errored;
            return self.state;
        }

        let answer = self.reply_index(Message::is_answer).map(|i| self.messages[i].clone());
        self.history.push(Exchange {
            question: self.last_query.clone().unwrap_or_default(),
            answer,
            thread_id: self.thread_id.clone(),
            completed_at: Utc::now(),
        });
        self.state = QueryState::Complete;
        self.state
    }

    /// Record a terminal failure as an Error message and expose retry.
    pub fn fail(&mut self, error: &ClientError) {
        let _ = self.upsert_error(error.to_string());
        self.last_error = Some(error.clone());
        self.state = QueryState::Errored;
    }

    /// Clear the log, thread and retry state.
    pub fn new_chat(&mut self) {
        self.messages.clear();
        self.thread_id = None;
        self.last_query = None;
        self.last_error = None;
        self.reply_start = 0;
        self.state = QueryState::Idle;
    }

    /// Resolve a rendered citation marker to the source it points at.
    pub fn activate_citation(
        &self,
        message_index: usize,
        citation_id: &str,
        resolver: &dyn FileResolver,
    ) -> Option<ActivatedSource> {
        let message = self.messages.get(message_index)?;
        let citation = message.find_citation(citation_id)?;
        let info = message.sub_sources.get(&citation.file_key);
        Some(ActivatedSource {
            file_key: citation.file_key.clone(),
            chunk_text: citation.chunk_text.clone(),
            display_name: resolver.resolve_file_name(&citation.file_key),
            page: info.and_then(|i| i.page.or(i.page_num)),
            bounds: info
                .and_then(|i| i.bounding_box)
                .or_else(|| resolver.resolve_bounding_box(&citation.file_key)),
        })
    }

    /// Latest message of the current reply matching `pred`.
    fn reply_index(&self, pred: impl Fn(&Message) -> bool) -> Option<usize> {
        (self.reply_start..self.messages.len()).rev().find(|&i| pred(&self.messages[i]))
    }

    fn last_reply_index(&self, pred: impl Fn(&Message) -> bool) -> Option<usize> {
        let index = self.messages.len().checked_sub(1)?;
        (index >= self.reply_start && pred(&self.messages[index])).then_some(index)
    }
}
