//! Realtime streaming protocol engine.

pub mod assembler;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod provider;
pub mod transport;

pub use assembler::{SessionLimits, ToolCallAssembler, ToolCallInProgress};
pub use connection::{ConnectionManager, ConnectionState, Received};
pub use dispatcher::{EventDispatcher, ResponseError};
pub use events::{ClientEvent, MalformedEvent, ServerEvent};
pub use provider::RealtimeProvider;
pub use transport::{Connector, RealtimeTransport, WebSocketConnector};
