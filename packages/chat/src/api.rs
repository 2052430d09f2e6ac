//! REST client for the chat backend.
//!
//! The session manager only depends on the `ChatApi` trait; `HttpChatApi` is
//! the reqwest-backed implementation used by the binary.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::{
    domain::{ChatMessage, ChatRoom, Nickname, RoomId},
    dto::{ChatRoomDto, CreateRoomRequest, MessageBody, NicknameRequest, NicknameResponse},
    error::ApiError,
};

/// Default base URL of the chat REST API
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/chat";

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Chat backend operations the client relies on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Mint a nickname for the room (`POST /rooms/{roomId}/nickname`)
    async fn assign_nickname(
        &self,
        room: RoomId,
        request: NicknameRequest,
    ) -> Result<Nickname, ApiError>;

    /// Recent room history, oldest first (`GET /rooms/{roomId}/messages`)
    async fn recent_messages(&self, room: RoomId) -> Result<Vec<ChatMessage>, ApiError>;

    /// All rooms (`GET /rooms`)
    async fn list_rooms(&self) -> Result<Vec<ChatRoom>, ApiError>;

    /// One room (`GET /rooms/{roomId}`)
    async fn get_room(&self, room: RoomId) -> Result<ChatRoom, ApiError>;

    /// Create a room (`POST /rooms`)
    async fn create_room(
        &self,
        name: String,
        description: Option<String>,
    ) -> Result<ChatRoom, ApiError>;

    /// Delete a room (`DELETE /rooms/{roomId}`)
    async fn delete_room(&self, room: RoomId) -> Result<(), ApiError>;
}

/// `ChatApi` over HTTP
pub struct HttpChatApi {
    client: Client,
    base_url: String,
}

impl HttpChatApi {
    /// Create a client for the API rooted at `base_url`
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Request` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client reusing an existing `reqwest::Client`
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn assign_nickname(
        &self,
        room: RoomId,
        request: NicknameRequest,
    ) -> Result<Nickname, ApiError> {
        let url = self.url(&format!("/rooms/{}/nickname", room));
        tracing::debug!("Requesting nickname from {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        let body: NicknameResponse = Self::decode(response).await?;

        Ok(Nickname::try_from(body)?)
    }

    async fn recent_messages(&self, room: RoomId) -> Result<Vec<ChatMessage>, ApiError> {
        let url = self.url(&format!("/rooms/{}/messages", room));
        tracing::debug!("Fetching history from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        let bodies: Vec<MessageBody> = Self::decode(response).await?;

        Ok(bodies.into_iter().map(ChatMessage::from).collect())
    }

    async fn list_rooms(&self) -> Result<Vec<ChatRoom>, ApiError> {
        let response = self
            .client
            .get(self.url("/rooms"))
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        let rooms: Vec<ChatRoomDto> = Self::decode(response).await?;

        rooms
            .into_iter()
            .map(|dto| ChatRoom::try_from(dto).map_err(ApiError::from))
            .collect()
    }

    async fn get_room(&self, room: RoomId) -> Result<ChatRoom, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/rooms/{}", room)))
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::RoomNotFound(room));
        }
        let dto: ChatRoomDto = Self::decode(response).await?;

        Ok(ChatRoom::try_from(dto)?)
    }

    async fn create_room(
        &self,
        name: String,
        description: Option<String>,
    ) -> Result<ChatRoom, ApiError> {
        let request = CreateRoomRequest { name, description };
        let response = self
            .client
            .post(self.url("/rooms"))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        let dto: ChatRoomDto = Self::decode(response).await?;
        let room = ChatRoom::try_from(dto)?;
        tracing::info!("Created room {} ({})", room.id, room.name);

        Ok(room)
    }

    async fn delete_room(&self, room: RoomId) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/rooms/{}", room)))
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::RoomNotFound(room));
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        tracing::info!("Deleted room {}", room);

        Ok(())
    }
}
