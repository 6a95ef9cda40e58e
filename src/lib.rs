#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod backoff;
pub mod config;
pub mod error;
pub mod event;
pub mod socket;
pub mod target;
pub mod transport;

pub use crate::config::{OverflowPolicy, Settings};
pub use crate::error::Error;
pub use crate::event::{CloseInfo, ErrorReason, Event, EventKind, ListenerId};
pub use crate::socket::{ConnectionState, DEFAULT_CLOSE_CODE, ReconnectingSocket, WeakSocket};
pub use crate::target::Target;
#[cfg(feature = "tungstenite")]
pub use crate::transport::tungstenite::{HeartbeatStyle, WebSocketConnector};
pub use crate::transport::{Connection, Connector, Endpoint, Frame, Payload, TransportEvent};

pub type Result<T> = std::result::Result<T, Error>;
