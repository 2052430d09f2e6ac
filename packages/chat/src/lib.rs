//! Chat client library for the hiroba campus community board.
//!
//! This library provides the chat session manager (nickname assignment, room
//! join/leave, message send and receive) together with the REST and
//! STOMP-over-WebSocket adapters it runs on and a terminal front end.

// model
pub mod domain;
pub mod dto;
pub mod error;

// adapters
pub mod api;
pub mod transport;

// session lifecycle
pub mod session;

// terminal front end
pub mod config;
pub mod formatter;
pub mod runner;
mod ui;
