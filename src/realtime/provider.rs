//! Completion provider backed by the realtime streaming service.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use super::connection::ConnectionManager;
use super::dispatcher::{EventDispatcher, ResponseError};
use super::events::ClientEvent;
use super::transport::{Connector, WebSocketConnector};
use crate::agent::notifier::{Notifier, TracingNotifier};
use crate::config::RtloopConfig;
use crate::error::RtloopError;
use crate::provider::{Completion, CompletionProvider, CompletionRequest};
use crate::tools::ToolExecutor;
use crate::types::{Message, Role};

pub const PROVIDER_NAME: &str = "openai-realtime";

/// Realtime provider: one warm connection reused across turns while healthy.
pub struct RealtimeProvider {
    connection: ConnectionManager,
    executor: Arc<ToolExecutor>,
    notifier: Arc<dyn Notifier>,
    max_malformed_events: usize,
    partial: Option<Completion>,
}

impl RealtimeProvider {
    pub fn new(
        connector: Arc<dyn Connector>,
        executor: Arc<ToolExecutor>,
        config: &RtloopConfig,
    ) -> Self {
        Self {
            connection: ConnectionManager::new(
                connector,
                config.receive_timeout,
                config.max_tool_calls,
            ),
            executor,
            notifier: Arc::new(TracingNotifier),
            max_malformed_events: config.max_malformed_events,
            partial: None,
        }
    }

    /// Provider talking to the configured websocket endpoint.
    pub fn from_config(
        config: &RtloopConfig,
        executor: Arc<ToolExecutor>,
    ) -> Result<Self, RtloopError> {
        let connector = WebSocketConnector::from_config(config)?;
        Ok(Self::new(Arc::new(connector), executor, config))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Send the message being answered.
    ///
    /// Tool results already delivered while streaming are not sent again.
    async fn send_last(&mut self, last: &Message) -> Result<(), RtloopError> {
        match last.role {
            Role::Tool => {
                for result in last.results() {
                    if self.connection.was_delivered(&result.tool_use_id) {
                        continue;
                    }
                    self.connection
                        .send(&ClientEvent::message(Role::Tool, result.output.clone()))
                        .await?;
                    self.connection.mark_delivered(result.tool_use_id.clone());
                }
                Ok(())
            }
            Role::User | Role::Assistant => {
                let text = last.text();
                if text.is_empty() {
                    return Err(RtloopError::InvalidArgument(
                        "No text content in last message".into(),
                    ));
                }
                self.connection
                    .send(&ClientEvent::message(last.role, text))
                    .await
            }
        }
    }
}

#[async_trait]
impl CompletionProvider for RealtimeProvider {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn begin_turn(&mut self) {
        self.connection.reset_turn_limits();
    }

    fn tool_call_count(&self) -> usize {
        self.connection.tool_call_count()
    }

    async fn complete(
        &mut self,
        request: CompletionRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Completion, RtloopError> {
        self.partial = None;
        let Some((last, history)) = request.messages.split_last() else {
            return Err(RtloopError::InvalidArgument(
                "Cannot complete an empty conversation".into(),
            ));
        };
        if cancel.is_cancelled() {
            return Err(RtloopError::Interrupted);
        }

        let span = info_span!("realtime_complete", messages = request.messages.len());
        async {
            self.connection.connect().await?;
            self.connection.send_history(history).await?;
            self.send_last(last).await?;
            self.connection
                .send(&ClientEvent::response(request.system, request.tools))
                .await?;

            let completion = match EventDispatcher::new(
                &self.executor,
                self.notifier.as_ref(),
                self.max_malformed_events,
            )
            .run(&mut self.connection, cancel)
            .await
            {
                Ok(completion) => completion,
                Err(ResponseError { error, partial }) => {
                    self.partial = partial;
                    return Err(error);
                }
            };
            debug!(
                content = completion.message.content.len(),
                tool_calls = completion.tool_results.len(),
                "Realtime response complete"
            );
            Ok::<_, RtloopError>(completion)
        }
        .instrument(span)
        .await
    }

    fn take_partial(&mut self) -> Option<Completion> {
        self.partial.take()
    }

    async fn close(&mut self) {
        self.connection.cleanup().await;
    }
}
