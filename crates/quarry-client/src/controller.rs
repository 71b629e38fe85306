//! Query lifecycle: submit, stream, retry, new chat.

use std::sync::Arc;
use std::time::Duration;

use quarry_core::errors::ClientError;
use quarry_core::ids::{CollectionId, QueryId};
use quarry_core::messages::Message;
use quarry_core::protocol::{InboundFrame, OutboundFrame, QueryPayload};
use quarry_settings::QuarrySettings;
use quarry_telemetry::StreamMetrics;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, info_span, Instrument};

use crate::coalescer::{Coalescer, ResponseChunk};
use crate::collaborators::{FileResolver, IdentityProvider, SessionObserver};
use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::router::FrameSubscription;
use crate::session::{ActivatedSource, QueryState, SessionContext};
use crate::stream::AnswerStream;

/// Per-client knobs derived from settings.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub frame_interval: Duration,
    pub use_reasoning: Option<bool>,
    pub use_planning: Option<bool>,
    pub use_deep_search: Option<bool>,
}

impl ClientConfig {
    pub fn from_settings(settings: &QuarrySettings) -> Result<Self, ClientError> {
        Ok(Self {
            connection: ConnectionConfig::from_settings(&settings.server)?,
            frame_interval: settings.stream.frame_interval(),
            use_reasoning: settings.query.use_reasoning,
            use_planning: settings.query.use_planning,
            use_deep_search: settings.query.use_deep_search,
        })
    }
}

/// What the user asked, and where.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRequest {
    pub collection: CollectionId,
    pub query: String,
    pub file_keys: Vec<String>,
}

impl QueryRequest {
    pub fn new(collection: CollectionId, query: impl Into<String>) -> Self {
        Self {
            collection,
            query: query.into(),
            file_keys: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_file_keys(mut self, file_keys: Vec<String>) -> Self {
        self.file_keys = file_keys;
        self
    }
}

/// How a query ended.
#[derive(Clone, Debug)]
pub struct QueryOutcome {
    pub query_id: QueryId,
    pub state: QueryState,
    pub answer: Option<Message>,
    pub error: Option<ClientError>,
}

impl QueryOutcome {
    pub fn is_complete(&self) -> bool {
        self.state == QueryState::Complete
    }
}

/// Streaming query client for one conversation.
///
/// Queries run one at a time: `submit` and `retry` take `&mut self` and
/// return once the stream reaches a terminal state. Runtime failures are
/// reported in the outcome and in the session log; `Err` is reserved for
/// calls that could not start a query at all.
pub struct QueryClient {
    config: ClientConfig,
    connection: ConnectionManager,
    session: SessionContext,
    resolver: Arc<dyn FileResolver>,
    observer: Arc<dyn SessionObserver>,
    metrics: Arc<StreamMetrics>,
    last_request: Option<QueryRequest>,
}

impl QueryClient {
    pub fn new(
        config: ClientConfig,
        identity: Arc<dyn IdentityProvider>,
        resolver: Arc<dyn FileResolver>,
        observer: Arc<dyn SessionObserver>,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        Self {
            connection: ConnectionManager::new(config.connection.clone(), identity),
            config,
            session: SessionContext::new(),
            resolver,
            observer,
            metrics,
            last_request: None,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub async fn submit(&mut self, request: QueryRequest) -> Result<QueryOutcome, ClientError> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(ClientError::InvalidQuery("query is empty".into()));
        }
        let request = QueryRequest { query, ..request };
        self.last_request = Some(request.clone());
        self.run(request, false).await
    }

    /// Resubmit the last query verbatim.
    pub async fn retry(&mut self) -> Result<QueryOutcome, ClientError> {
        let request = self.last_request.clone().ok_or(ClientError::NothingToRetry)?;
        self.run(request, true).await
    }

    /// Start over without dropping the connection.
    pub fn new_chat(&mut self) {
        self.session.new_chat();
        self.last_request = None;
        self.notify();
        info!("new chat");
    }

    /// Resolve a citation and report it to the observer.
    pub fn activate_citation(&self, message_index: usize, citation_id: &str) -> Option<ActivatedSource> {
        let source = self
            .session
            .activate_citation(message_index, citation_id, self.resolver.as_ref())?;
        self.observer.on_source_activated(&source);
        Some(source)
    }

    pub async fn close(&mut self) {
        self.connection.close().await;
    }

    async fn run(&mut self, request: QueryRequest, is_retry: bool) -> Result<QueryOutcome, ClientError> {
        let query_id = QueryId::new();
        let span = info_span!("query", query_id = %query_id, collection = %request.collection, retry = is_retry);
        self.run_inner(query_id, request, is_retry).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        query_id: QueryId,
        request: QueryRequest,
        is_retry: bool,
    ) -> Result<QueryOutcome, ClientError> {
        self.session.begin_query(&request.query, is_retry);
        self.notify();

        let mut stream = AnswerStream::new(Arc::clone(&self.resolver), Arc::clone(&self.metrics));

        if let Err(e) = self.connection.connect(&request.collection).await {
            return Ok(self.fail(query_id, &mut stream, e));
        }

        // Register before sending so no frame can slip past.
        let mut subscription = self.connection.add_message_handler();

        let payload = QueryPayload {
            collection_name: request.collection.to_string(),
            query: request.query.clone(),
            thread_id: self.session.thread_id().map(ToString::to_string),
            file_keys: request.file_keys.clone(),
            use_reasoning: self.config.use_reasoning,
            use_planning: self.config.use_planning,
            use_deep_search: self.config.use_deep_search,
        };
        if let Err(e) = self.connection.send_message(&OutboundFrame::Query(payload)).await {
            return Ok(self.fail(query_id, &mut stream, e));
        }
        info!(thread_id = ?self.session.thread_id().map(ToString::to_string), "query sent");

        let state = self.drive(&mut subscription, &mut stream).await;
        let outcome = self.outcome(query_id, state);
        info!(state = ?outcome.state, "query finished");
        Ok(outcome)
    }

    /// Pump frames into the stream until a terminal frame arrives.
    async fn drive(&mut self, subscription: &mut FrameSubscription, stream: &mut AnswerStream) -> QueryState {
        let sent_at = Instant::now();
        let mut first_frame = true;
        let mut coalescer: Coalescer<ResponseChunk> = Coalescer::new(self.config.frame_interval);

        loop {
            let deadline = coalescer.deadline();
            tokio::select! {
                frame = subscription.recv() => {
                    let Some(frame) = frame else {
                        self.flush(&mut coalescer, stream);
                        let err = ClientError::ConnectionLost("frame handler closed".into());
                        stream.fail(&mut self.session, &err);
                        self.notify();
                        return QueryState::Errored;
                    };
                    if frame.is_noise() {
                        debug!(frame_type = frame.frame_type(), "ignoring frame");
                        continue;
                    }
                    self.metrics.record_frame(frame.frame_type());
                    if first_frame {
                        first_frame = false;
                        self.metrics.observe_first_frame(sent_at.elapsed());
                        self.session.mark_streaming();
                    }

                    match frame {
                        InboundFrame::Response(response) => {
                            coalescer.push(ResponseChunk::from(response));
                            continue;
                        }
                        InboundFrame::Progress(progress) => stream.apply_progress(&mut self.session, &progress),
                        InboundFrame::Status(status) => stream.apply_status(&mut self.session, &status),
                        InboundFrame::Batch(batch) => stream.apply_batch(&mut self.session, &batch),
                        InboundFrame::Complete {} => {
                            self.flush(&mut coalescer, stream);
                            let state = stream.finish(&mut self.session);
                            self.notify();
                            return state;
                        }
                        InboundFrame::Error(error) => {
                            self.flush(&mut coalescer, stream);
                            stream.fail(&mut self.session, &error.to_client_error());
                            self.notify();
                            return QueryState::Errored;
                        }
                        InboundFrame::Pong {} | InboundFrame::Unknown => {}
                    }
                    self.notify();
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some((chunk, merged)) = coalescer.take_due(Instant::now()) {
                        self.metrics.record_flush(merged);
                        stream.apply_chunk(&mut self.session, chunk);
                        self.notify();
                    }
                }
            }
        }
    }

    fn flush(&mut self, coalescer: &mut Coalescer<ResponseChunk>, stream: &mut AnswerStream) {
        if let Some((chunk, merged)) = coalescer.flush() {
            self.metrics.record_flush(merged);
            stream.apply_chunk(&mut self.session, chunk);
        }
    }

    fn fail(&mut self, query_id: QueryId, stream: &mut AnswerStream, error: ClientError) -> QueryOutcome {
        stream.fail(&mut self.session, &error);
        self.notify();
        self.outcome(query_id, QueryState::Errored)
    }

    fn outcome(&self, query_id: QueryId, state: QueryState) -> QueryOutcome {
        let answer = self
            .session
            .messages()
            .iter()
            .rev()
            .take_while(|m| !m.is_question())
            .find(|m| m.is_answer())
            .cloned();
        QueryOutcome {
            query_id,
            state,
            answer,
            error: self.session.last_error().cloned(),
        }
    }

    fn notify(&self) {
        self.observer.on_session_messages_changed(self.session.messages());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::collaborators::{BasenameResolver, NoopObserver};

    struct NoToken;

    #[async_trait]
    impl IdentityProvider for NoToken {
        async fn identity_token(&self) -> Result<String, ClientError> {
            Err(ClientError::TokenUnavailable("signed out".into()))
        }
    }

    fn client() -> QueryClient {
        let config = ClientConfig::from_settings(&QuarrySettings::default()).unwrap();
        QueryClient::new(
            config,
            Arc::new(NoToken),
            Arc::new(BasenameResolver),
            Arc::new(NoopObserver),
            Arc::new(StreamMetrics::new()),
        )
    }

    #[test]
    fn config_follows_settings() {
        let mut settings = QuarrySettings::default();
        settings.stream.frame_interval_ms = 40;
        settings.query.use_planning = Some(true);
        let config = ClientConfig::from_settings(&settings).unwrap();
        assert_eq!(config.frame_interval, Duration::from_millis(40));
        assert_eq!(config.use_planning, Some(true));
        assert_eq!(config.connection.url.as_str(), "ws://localhost:8000/ws");
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let mut c = client();
        let err = c
            .submit(QueryRequest::new(CollectionId::from_raw("c"), "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidQuery(_)));
        assert!(c.session().messages().is_empty());
    }

    #[tokio::test]
    async fn retry_without_history_is_rejected() {
        let mut c = client();
        assert!(matches!(c.retry().await.unwrap_err(), ClientError::NothingToRetry));
    }

    #[tokio::test]
    async fn token_failure_becomes_error_message() {
        let mut c = client();
        let outcome = c.submit(QueryRequest::new(CollectionId::from_raw("c"), "Q")).await.unwrap();
        assert_eq!(outcome.state, QueryState::Errored);
        assert!(matches!(outcome.error, Some(ClientError::TokenUnavailable(_))));
        assert!(c.session().can_retry());

        let messages = c.session().messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].is_error());

        let outcome = c.retry().await.unwrap();
        assert_eq!(outcome.state, QueryState::Errored);
        let questions = c.session().messages().iter().filter(|m| m.is_question()).count();
        assert_eq!(questions, 1);
    }

    #[tokio::test]
    async fn new_chat_clears_retry() {
        let mut c = client();
        let _ = c.submit(QueryRequest::new(CollectionId::from_raw("c"), "Q")).await.unwrap();
        c.new_chat();
        assert!(c.session().messages().is_empty());
        assert!(matches!(c.retry().await.unwrap_err(), ClientError::NothingToRetry));
    }
}
