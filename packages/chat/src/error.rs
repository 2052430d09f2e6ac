//! Error types for the chat client.

use thiserror::Error;

use crate::{
    config::ConfigError,
    domain::{DomainError, RoomId},
};

/// Errors from the REST backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Network failure or the request could not be sent
    #[error("Request failed: {0}")]
    Request(String),

    /// Backend answered with a non-success status
    #[error("Backend returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Room {0} does not exist")]
    RoomNotFound(RoomId),

    /// Response body was not the expected JSON
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Response decoded but held an invalid value
    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] DomainError),
}

/// Errors from the publish/subscribe transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The socket could not be opened
    #[error("Connection error: {0}")]
    Connect(String),

    /// The broker refused the session
    #[error("Broker rejected the connection: {0}")]
    Rejected(String),

    /// The connection is closed or was deactivated
    #[error("Connection closed")]
    Closed,

    /// The broker sent something that is not a valid frame
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors surfaced to the user by the session manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Nickname request failed; the attempt is abandoned
    #[error("Could not get a nickname: {0}")]
    Nickname(ApiError),

    /// Transport failed to connect or dropped; the session is over
    #[error("Chat connection failed: {0}")]
    Transport(TransportError),

    /// Send attempted while not joined
    #[error("Not connected to a room")]
    NotConnected,

    /// Send attempted with text that cannot be published
    #[error("Message rejected: {0}")]
    InvalidContent(DomainError),
}

/// Client-level errors reported by the terminal front end
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
