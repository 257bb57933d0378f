//! Duplex text-frame transport to the realtime service.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::config::RtloopConfig;
use crate::error::RtloopError;

/// An open channel carrying JSON text frames.
#[async_trait]
pub trait RealtimeTransport: Send {
    async fn send_text(&mut self, payload: String) -> Result<(), RtloopError>;

    /// Next text frame, or `None` once the remote closed the channel.
    async fn next_text(&mut self) -> Option<Result<String, RtloopError>>;

    async fn close(&mut self) -> Result<(), RtloopError>;
}

/// Opens transports. Never retries; retry policy belongs to the caller.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RealtimeTransport>, RtloopError>;
}

type RealtimeWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to `<base_url>?model=<model>` with bearer authentication.
#[derive(Clone)]
pub struct WebSocketConnector {
    url: String,
    api_key: String,
}

impl WebSocketConnector {
    pub fn new(base_url: &str, model: &str, api_key: impl Into<String>) -> Result<Self, RtloopError> {
        Ok(Self {
            url: build_realtime_url(base_url, model)?,
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &RtloopConfig) -> Result<Self, RtloopError> {
        Self::new(&config.base_url, &config.model, config.resolve_api_key()?)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn RealtimeTransport>, RtloopError> {
        let socket = connect_realtime_socket(&self.url, &self.api_key).await?;
        debug!(url = %self.url, "Realtime websocket connected");
        Ok(Box::new(WebSocketTransport { socket }))
    }
}

struct WebSocketTransport {
    socket: RealtimeWebSocket,
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn send_text(&mut self, payload: String) -> Result<(), RtloopError> {
        self.socket
            .send(Message::Text(payload))
            .await
            .map_err(|error| RtloopError::Connection(format!("Realtime send failed: {error}")))
    }

    async fn next_text(&mut self) -> Option<Result<String, RtloopError>> {
        loop {
            let frame = match self.socket.next().await? {
                Ok(frame) => frame,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(error) => {
                    return Some(Err(RtloopError::Connection(format!(
                        "Realtime websocket receive failed: {error}"
                    ))))
                }
            };
            match frame {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(bytes) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Message::Ping(payload) => {
                    if let Err(error) = self.socket.send(Message::Pong(payload)).await {
                        return Some(Err(RtloopError::Connection(format!(
                            "Realtime pong failed: {error}"
                        ))));
                    }
                }
                Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(_) => return None,
            }
        }
    }

    async fn close(&mut self) -> Result<(), RtloopError> {
        match self.socket.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(error) => Err(RtloopError::Connection(format!(
                "Realtime close failed: {error}"
            ))),
        }
    }
}

pub(crate) fn build_realtime_url(base_url: &str, model: &str) -> Result<String, RtloopError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(RtloopError::Configuration(
            "Realtime base URL cannot be empty".into(),
        ));
    }
    let separator = if trimmed.contains('?') { "&" } else { "?" };
    Ok(format!("{trimmed}{separator}model={model}"))
}

async fn connect_realtime_socket(url: &str, api_key: &str) -> Result<RealtimeWebSocket, RtloopError> {
    let mut request = url.into_client_request().map_err(|error| {
        RtloopError::Configuration(format!("Invalid realtime websocket URL: {error}"))
    })?;
    let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|error| {
        RtloopError::Configuration(format!("Invalid realtime auth header: {error}"))
    })?;
    request.headers_mut().insert("Authorization", auth_value);
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    connect_async(request)
        .await
        .map(|(socket, _)| socket)
        .map_err(map_connect_error)
}

fn map_connect_error(error: WsError) -> RtloopError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if matches!(status, 401 | 403) {
                RtloopError::Authentication(format!(
                    "Realtime websocket authentication failed with status {status}"
                ))
            } else {
                RtloopError::Connection(format!(
                    "Realtime websocket handshake failed with status {status}"
                ))
            }
        }
        WsError::Url(error) => {
            RtloopError::Configuration(format!("Invalid realtime websocket URL: {error}"))
        }
        other => RtloopError::Connection(format!("Realtime websocket connect failed: {other}")),
    }
}
