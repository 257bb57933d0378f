//! Connection lifecycle, session state and the single cleanup primitive.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::assembler::{SessionLimits, ToolCallAssembler, ToolCallInProgress};
use super::events::ClientEvent;
use super::transport::{Connector, RealtimeTransport};
use crate::error::RtloopError;
use crate::types::{Message, Role, ToolUse};

/// Lifecycle state of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Closing,
    Faulted,
}

/// Outcome of one receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Payload(String),
    /// Nothing arrived within the receive window. The connection is
    /// already torn down.
    TimedOut,
}

/// Everything scoped to one open connection, reset together by cleanup.
struct ConnectionSession {
    transport: Option<Box<dyn RealtimeTransport>>,
    state: ConnectionState,
    limits: SessionLimits,
    assembler: ToolCallAssembler,
    is_first_connection: bool,
    delivered_tool_results: HashSet<String>,
}

impl ConnectionSession {
    fn new(max_tool_calls: usize) -> Self {
        Self {
            transport: None,
            state: ConnectionState::Disconnected,
            limits: SessionLimits::new(max_tool_calls),
            assembler: ToolCallAssembler::new(),
            is_first_connection: true,
            delivered_tool_results: HashSet::new(),
        }
    }
}

/// Owns the duplex connection to the realtime service.
///
/// Every failing operation runs [`ConnectionManager::cleanup`] before the
/// error is returned, so no error leaves the manager `Faulted`.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    receive_timeout: Duration,
    session: ConnectionSession,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, receive_timeout: Duration, max_tool_calls: usize) -> Self {
        Self {
            connector,
            receive_timeout,
            session: ConnectionSession::new(max_tool_calls),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    pub fn is_connected(&self) -> bool {
        self.session.state == ConnectionState::Connected
    }

    /// Whether history still has to be replayed on this connection.
    pub fn is_first_connection(&self) -> bool {
        self.session.is_first_connection
    }

    pub fn tool_call_count(&self) -> usize {
        self.session.limits.tool_call_count()
    }

    pub fn in_progress_call(&self) -> Option<&ToolCallInProgress> {
        self.session.assembler.in_progress()
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// Open the connection unless one is already up.
    pub async fn connect(&mut self) -> Result<(), RtloopError> {
        if self.is_connected() {
            return Ok(());
        }
        match self.connector.connect().await {
            Ok(transport) => {
                self.session.transport = Some(transport);
                self.session.state = ConnectionState::Connected;
                info!("Realtime connection established");
                Ok(())
            }
            Err(error) => Err(self.fault(error).await),
        }
    }

    /// Replay prior turns as conversation items, once per fresh connection.
    ///
    /// Only text-bearing messages are replayed; tool results are sent as
    /// `tool` role text.
    pub async fn send_history(&mut self, messages: &[Message]) -> Result<(), RtloopError> {
        if !self.session.is_first_connection {
            return Ok(());
        }
        let mut replayed = 0usize;
        for message in messages {
            if let Some(text) = replay_text(message) {
                self.send(&ClientEvent::message(message.role, text)).await?;
                replayed += 1;
            }
        }
        self.session.is_first_connection = false;
        debug!(replayed, "Replayed conversation history");
        Ok(())
    }

    pub async fn send(&mut self, event: &ClientEvent) -> Result<(), RtloopError> {
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(error) => return Err(self.fault(error.into()).await),
        };
        let result = match self.session.transport.as_mut() {
            Some(transport) if self.session.state == ConnectionState::Connected => {
                transport.send_text(payload).await
            }
            _ => Err(RtloopError::InvalidState(format!(
                "cannot send {} while {}",
                event.kind(),
                self.session.state
            ))),
        };
        match result {
            Ok(()) => {
                debug!(kind = event.kind(), "Sent realtime event");
                Ok(())
            }
            Err(error) => Err(self.fault(error).await),
        }
    }

    /// Wait for the next frame, bounded by the receive timeout.
    ///
    /// Cancellation, timeout and a closed stream all tear the connection down.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Result<Received, RtloopError> {
        let timeout = self.receive_timeout;
        let outcome = match self.session.transport.as_mut() {
            Some(transport) => {
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    frame = tokio::time::timeout(timeout, transport.next_text()) => Some(frame),
                }
            }
            None => {
                let error = RtloopError::InvalidState("receive without an open connection".into());
                return Err(self.fault(error).await);
            }
        };

        match outcome {
            None => {
                self.cleanup().await;
                Err(RtloopError::Interrupted)
            }
            Some(Err(_)) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Realtime receive timed out");
                self.cleanup().await;
                Ok(Received::TimedOut)
            }
            Some(Ok(Some(Ok(payload)))) => Ok(Received::Payload(payload)),
            Some(Ok(Some(Err(error)))) => Err(self.fault(error).await),
            Some(Ok(None)) => {
                let error = RtloopError::Connection(
                    "connection closed before response.done".into(),
                );
                Err(self.fault(error).await)
            }
        }
    }

    /// Feed an argument fragment to the assembler under the session limits.
    pub async fn on_tool_delta(
        &mut self,
        call_id: Option<&str>,
        function_name: Option<&str>,
        fragment: &str,
    ) -> Result<(), RtloopError> {
        let session = &mut self.session;
        match session
            .assembler
            .on_delta(&mut session.limits, call_id, function_name, fragment)
        {
            Ok(()) => Ok(()),
            Err(error) => Err(self.fault(error).await),
        }
    }

    pub async fn on_tool_done(&mut self, call_id: Option<&str>) -> Result<ToolUse, RtloopError> {
        match self.session.assembler.on_done(call_id) {
            Ok(tool_use) => Ok(tool_use),
            Err(error) => Err(self.fault(error).await),
        }
    }

    /// Record that the result for `tool_use_id` already reached the service.
    pub fn mark_delivered(&mut self, tool_use_id: impl Into<String>) {
        self.session.delivered_tool_results.insert(tool_use_id.into());
    }

    pub fn was_delivered(&self, tool_use_id: &str) -> bool {
        self.session.delivered_tool_results.contains(tool_use_id)
    }

    /// Start a fresh tool-call budget for a new user turn.
    pub fn reset_turn_limits(&mut self) {
        self.session.limits.reset();
    }

    /// Mark the connection faulted, clean up, and hand the error back.
    pub async fn fault(&mut self, error: RtloopError) -> RtloopError {
        warn!(error = %error, "Realtime connection faulted");
        self.session.state = ConnectionState::Faulted;
        self.cleanup().await;
        error
    }

    /// Close the channel and reset all session state.
    ///
    /// Idempotent; close errors are logged, never returned.
    pub async fn cleanup(&mut self) {
        if let Some(mut transport) = self.session.transport.take() {
            self.session.state = ConnectionState::Closing;
            if let Err(error) = transport.close().await {
                warn!(error = %error, "Failed to close realtime connection");
            }
        }
        self.session.state = ConnectionState::Disconnected;
        self.session.limits.reset();
        self.session.assembler.clear();
        self.session.is_first_connection = true;
        self.session.delivered_tool_results.clear();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.session.state)
            .field("tool_call_count", &self.session.limits.tool_call_count())
            .field("is_first_connection", &self.session.is_first_connection)
            .finish_non_exhaustive()
    }
}

/// Text sent for `message` during history replay, if it carries any.
pub(crate) fn replay_text(message: &Message) -> Option<String> {
    let text = match message.role {
        Role::Tool => message
            .results()
            .iter()
            .map(|result| result.output.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        Role::User | Role::Assistant => message.text(),
    };
    (!text.is_empty()).then_some(text)
}
