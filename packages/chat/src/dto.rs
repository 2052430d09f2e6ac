//! Data Transfer Objects for the chat backend, and their conversions.
//!
//! All shapes are camelCase JSON. The same `MessageBody` travels in both
//! directions; the server fills in `id` and `createdAt` on the copy it
//! broadcasts.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use hiroba_shared::time::{datetime_from_parts, parse_server_datetime};

use crate::domain::{
    ChatMessage, ChatRoom, DomainError, MessageContent, MessageType, Nickname, RoomId,
};

/// A backend timestamp in any of the serializations it is known to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerDateTime {
    Text(String),
    Parts(Vec<i64>),
}

impl ServerDateTime {
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Text(text) => parse_server_datetime(text),
            Self::Parts(parts) => datetime_from_parts(parts),
        }
    }
}

// ========================================
// Room messages
// ========================================

/// Body of a room message, inbound or outbound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub sender_nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub r#type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<ServerDateTime>,
}

impl MessageBody {
    /// JOIN signal carrying the session's nickname
    pub fn join(sender: &Nickname) -> Self {
        Self::outbound(sender, MessageType::Join, None)
    }

    /// LEAVE signal carrying the session's nickname
    pub fn leave(sender: &Nickname) -> Self {
        Self::outbound(sender, MessageType::Leave, None)
    }

    /// CHAT message carrying user text
    pub fn chat(sender: &Nickname, content: &MessageContent) -> Self {
        Self::outbound(
            sender,
            MessageType::Chat,
            Some(content.as_str().to_string()),
        )
    }

    fn outbound(sender: &Nickname, kind: MessageType, content: Option<String>) -> Self {
        Self {
            id: None,
            sender_nickname: sender.as_str().to_string(),
            content,
            r#type: kind,
            created_at: None,
        }
    }
}

impl From<MessageBody> for ChatMessage {
    fn from(dto: MessageBody) -> Self {
        Self {
            id: dto.id,
            created_at: dto.created_at.as_ref().and_then(ServerDateTime::to_naive),
            sender: dto.sender_nickname,
            content: dto.content,
            kind: dto.r#type,
        }
    }
}

// ========================================
// Nickname assignment
// ========================================

/// Request body for `POST /rooms/{roomId}/nickname`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NicknameRequest {
    pub use_anonymous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl NicknameRequest {
    pub fn anonymous() -> Self {
        Self {
            use_anonymous: true,
            user_name: None,
        }
    }

    pub fn real_name(user_name: impl Into<String>) -> Self {
        Self {
            use_anonymous: false,
            user_name: Some(user_name.into()),
        }
    }
}

/// Response body for `POST /rooms/{roomId}/nickname`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicknameResponse {
    pub nickname: String,
}

impl TryFrom<NicknameResponse> for Nickname {
    type Error = DomainError;

    fn try_from(dto: NicknameResponse) -> Result<Self, Self::Error> {
        Nickname::new(dto.nickname)
    }
}

// ========================================
// Rooms
// ========================================

/// A room as returned by `GET /rooms` and `POST /rooms`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomDto {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub current_users: Option<u32>,
    #[serde(default)]
    pub max_users: Option<u32>,
    #[serde(default)]
    pub created_at: Option<ServerDateTime>,
}

impl TryFrom<ChatRoomDto> for ChatRoom {
    type Error = DomainError;

    fn try_from(dto: ChatRoomDto) -> Result<Self, Self::Error> {
        Ok(Self {
            id: RoomId::new(dto.id)?,
            created_at: dto.created_at.as_ref().and_then(ServerDateTime::to_naive),
            name: dto.name,
            description: dto.description.filter(|d| !d.trim().is_empty()),
            current_users: dto.current_users.unwrap_or(0),
            max_users: dto.max_users,
        })
    }
}

/// Request body for `POST /rooms`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
