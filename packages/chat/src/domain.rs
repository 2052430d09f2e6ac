//! Domain model for chat rooms and sessions.
//!
//! Value objects validate on construction so that the session manager only
//! ever deals with well-formed room ids, nicknames and message contents.

use std::{fmt, str::FromStr};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Id of the single fixed room used by the global variant.
pub const GLOBAL_ROOM_ID: RoomId = RoomId(1);

/// Upper bound on chat message length, in characters.
pub const MAX_CONTENT_CHARS: usize = 500;

/// Upper bound on nickname length, in characters.
pub const MAX_NICKNAME_CHARS: usize = 50;

/// Validation errors raised by value objects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Room id must be a positive integer, got '{0}'")]
    InvalidRoomId(String),

    #[error("Nickname must not be empty")]
    EmptyNickname,

    #[error("Nickname is {len} characters long (max {max})")]
    NicknameTooLong { len: usize, max: usize },

    #[error("Message must not be empty")]
    EmptyContent,

    #[error("Message is {len} characters long (max {max})")]
    ContentTooLong { len: usize, max: usize },
}

// ========================================
// RoomId
// ========================================

/// Room identifier (positive integer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct RoomId(u64);

impl RoomId {
    pub fn new(value: u64) -> Result<Self, DomainError> {
        if value == 0 {
            return Err(DomainError::InvalidRoomId(value.to_string()));
        }
        Ok(Self(value))
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for RoomId {
    type Error = DomainError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomId> for u64 {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl FromStr for RoomId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u64>()
            .map_err(|_| DomainError::InvalidRoomId(s.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ========================================
// Nickname
// ========================================

/// Display identity assigned to a client for one session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nickname(String);

impl Nickname {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyNickname);
        }
        let len = trimmed.chars().count();
        if len > MAX_NICKNAME_CHARS {
            return Err(DomainError::NicknameTooLong {
                len,
                max: MAX_NICKNAME_CHARS,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ========================================
// MessageContent
// ========================================

/// Outbound chat text: trimmed, non-empty and length-bounded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent(String);

impl MessageContent {
    pub fn new(value: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyContent);
        }
        let len = trimmed.chars().count();
        if len > MAX_CONTENT_CHARS {
            return Err(DomainError::ContentTooLong {
                len,
                max: MAX_CONTENT_CHARS,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ========================================
// Messages and rooms
// ========================================

/// Kind of a room message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Chat,
    Join,
    Leave,
}

/// A message as received from the room topic or the history endpoint
///
/// Immutable once received; the sender is kept as a plain string because it
/// is whatever the backend relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Option<u64>,
    pub sender: String,
    pub content: Option<String>,
    pub kind: MessageType,
    pub created_at: Option<NaiveDateTime>,
}

impl ChatMessage {
    /// JOIN and LEAVE notices are rendered as system lines
    pub fn is_system(&self) -> bool {
        matches!(self.kind, MessageType::Join | MessageType::Leave)
    }
}

/// A chat room as listed by the backend
///
/// `current_users` is maintained by the backend; the client only observes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    pub current_users: u32,
    pub max_users: Option<u32>,
    pub created_at: Option<NaiveDateTime>,
}

impl ChatRoom {
    /// Local stand-in for the backend's seeded global room
    pub fn global() -> Self {
        Self {
            id: GLOBAL_ROOM_ID,
            name: "グローバルチャット".to_string(),
            description: Some("全員匿名のチャットルーム".to_string()),
            current_users: 0,
            max_users: None,
            created_at: None,
        }
    }
}

// ========================================
// Identity
// ========================================

/// How the user wants to appear in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    Anonymous,
    RealName,
}

impl FromStr for IdentityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anon" | "anonymous" => Ok(Self::Anonymous),
            "real" | "real-name" | "name" => Ok(Self::RealName),
            other => Err(format!("unknown identity mode '{}'", other)),
        }
    }
}

/// The logged-in user, as stored by the authentication flow
///
/// Only `name` matters to chat; the other fields are carried so the blob can
/// be read as-is.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CurrentUser {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl CurrentUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            username: None,
            name: name.into(),
            email: None,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }
}

// ========================================
// Room variants
// ========================================

/// Which room model the client runs
///
/// The two models differ in teardown: only `MultiRoom` publishes LEAVE,
/// `Global` relies on the backend noticing the disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomVariant {
    /// Single fixed room, anonymous only, no history
    Global,
    /// Room list and creation, identity choice, history replay
    MultiRoom,
}

impl RoomVariant {
    pub fn publishes_leave(self) -> bool {
        matches!(self, Self::MultiRoom)
    }

    pub fn replays_history(self) -> bool {
        matches!(self, Self::MultiRoom)
    }

    pub fn allows_real_name(self) -> bool {
        matches!(self, Self::MultiRoom)
    }
}

impl FromStr for RoomVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "multi" | "multi-room" => Ok(Self::MultiRoom),
            other => Err(format!("unknown room variant '{}'", other)),
        }
    }
}

// ========================================
// Destinations
// ========================================

/// Topic carrying a room's message stream
pub fn room_topic(room: RoomId) -> String {
    format!("/topic/chat/{}", room)
}

/// Destination for the JOIN signal
pub fn join_destination(room: RoomId) -> String {
    format!("/app/chat/{}/join", room)
}

/// Destination for the LEAVE signal
pub fn leave_destination(room: RoomId) -> String {
    format!("/app/chat/{}/leave", room)
}

/// Destination for chat text
pub fn send_destination(room: RoomId) -> String {
    format!("/app/chat/{}/send", room)
}
