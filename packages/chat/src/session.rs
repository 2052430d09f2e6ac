//! Chat session lifecycle management.
//!
//! `SessionManager` owns at most one `ChatSession` and drives it through
//! `Idle → NicknameRequested → Connecting → Joined → Leaving → Idle`, with
//! `Errored` reachable while requesting a nickname or connecting, and when a
//! joined connection fails.
//!
//! All session state is mutated by the task that owns the manager. The
//! asynchronous steps (nickname request, history fetch, transport connect)
//! run as spawned tasks and report back as `SessionEvent`s through
//! `next_event`; each event carries the generation it was started under and
//! is ignored once the session it belonged to has been torn down.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    api::ChatApi,
    domain::{
        ChatMessage, ChatRoom, CurrentUser, IdentityMode, MessageContent, Nickname, RoomVariant,
        join_destination, leave_destination, room_topic, send_destination,
    },
    dto::{MessageBody, NicknameRequest},
    error::{ApiError, SessionError, TransportError},
    transport::{Connection, EventCallback, SubscriptionId, Transport, TransportEvent},
};

/// Lifecycle state of the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    NicknameRequested,
    Connecting,
    Joined,
    Leaving,
    Errored,
}

/// Completion of an asynchronous step, tagged with its generation
pub enum SessionEvent {
    NicknameAssigned {
        generation: u64,
        result: Result<Nickname, ApiError>,
    },
    HistoryLoaded {
        generation: u64,
        result: Result<Vec<ChatMessage>, ApiError>,
    },
    Connected {
        generation: u64,
        result: Result<Box<dyn Connection>, TransportError>,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
}

impl SessionEvent {
    pub fn generation(&self) -> u64 {
        match self {
            Self::NicknameAssigned { generation, .. }
            | Self::HistoryLoaded { generation, .. }
            | Self::Connected { generation, .. }
            | Self::Transport { generation, .. } => *generation,
        }
    }
}

/// What handling an event changed, for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    NicknameAssigned(Nickname),
    HistoryLoaded(usize),
    Joined,
    MessageReceived(ChatMessage),
    Failed(SessionError),
    /// Stale or out-of-state event; nothing changed
    Ignored,
}

/// One attachment to one room
struct ChatSession {
    room: ChatRoom,
    nickname: Option<Nickname>,
    connection: Option<Box<dyn Connection>>,
    subscription: Option<SubscriptionId>,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    fn new(room: ChatRoom) -> Self {
        Self {
            room,
            nickname: None,
            connection: None,
            subscription: None,
            messages: Vec::new(),
        }
    }
}

/// Owner of the single active chat session
pub struct SessionManager {
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn Transport>,
    variant: RoomVariant,
    current_user: Option<CurrentUser>,
    state: SessionState,
    session: Option<ChatSession>,
    generation: u64,
    connected: bool,
    last_error: Option<SessionError>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionManager {
    /// Create a manager
    ///
    /// # Arguments
    ///
    /// * `api` - Backend used for nicknames and history
    /// * `transport` - Connection factory for room traffic
    /// * `variant` - Room model; decides history replay and LEAVE signalling
    /// * `current_user` - Logged-in user, `None` when browsing anonymously
    pub fn new(
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn Transport>,
        variant: RoomVariant,
        current_user: Option<CurrentUser>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            api,
            transport,
            variant,
            current_user,
            state: SessionState::Idle,
            session: None,
            generation: 0,
            connected: false,
            last_error: None,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn variant(&self) -> RoomVariant {
        self.variant
    }

    pub fn room(&self) -> Option<&ChatRoom> {
        self.session.as_ref().map(|s| &s.room)
    }

    pub fn nickname(&self) -> Option<&Nickname> {
        self.session.as_ref().and_then(|s| s.nickname.as_ref())
    }

    /// Message log of the active session, in arrival order
    pub fn messages(&self) -> &[ChatMessage] {
        self.session.as_ref().map_or(&[], |s| s.messages.as_slice())
    }

    /// Whether sending is currently possible
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn current_user(&self) -> Option<&CurrentUser> {
        self.current_user.as_ref()
    }

    /// Replace the logged-in user; sessions already started keep the name
    /// they were started with
    pub fn set_current_user(&mut self, user: Option<CurrentUser>) {
        self.current_user = user;
    }

    /// Identities the user may pick from when selecting a room
    pub fn identity_choices(&self) -> Vec<IdentityMode> {
        if self.variant.allows_real_name() && self.current_user.is_some() {
            vec![IdentityMode::Anonymous, IdentityMode::RealName]
        } else {
            vec![IdentityMode::Anonymous]
        }
    }

    /// Subscription present exactly when the connection is, and only while
    /// joined (or in the middle of leaving)
    pub fn handles_consistent(&self) -> bool {
        let (has_connection, has_subscription) = self.session.as_ref().map_or((false, false), |s| {
            (s.connection.is_some(), s.subscription.is_some())
        });
        match (has_connection, has_subscription) {
            (true, true) => matches!(self.state, SessionState::Joined | SessionState::Leaving),
            (false, false) => self.state != SessionState::Joined && !self.connected,
            _ => false,
        }
    }

    /// Start a session in `room`
    ///
    /// Any active session is torn down first. Real-name identity is only
    /// honoured for a logged-in user in the multi-room variant; the display
    /// name is captured now.
    pub fn select_room(&mut self, room: ChatRoom, identity: IdentityMode) {
        if self.session.is_some() || self.state != SessionState::Idle {
            self.leave();
        }

        let request = self.nickname_request(identity);
        self.generation += 1;
        let generation = self.generation;
        let room_id = room.id;

        tracing::info!(
            "Joining room {} ({}) {}",
            room_id,
            room.name,
            if request.use_anonymous {
                "anonymously"
            } else {
                "with real name"
            }
        );

        self.session = Some(ChatSession::new(room));
        self.last_error = None;
        self.transition(SessionState::NicknameRequested);

        let api = Arc::clone(&self.api);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = api.assign_nickname(room_id, request).await;
            tx.send(SessionEvent::NicknameAssigned { generation, result })
                .ok();
        });
    }

    fn nickname_request(&self, identity: IdentityMode) -> NicknameRequest {
        if identity == IdentityMode::Anonymous {
            return NicknameRequest::anonymous();
        }
        if !self.variant.allows_real_name() {
            tracing::info!("Real-name identity is not available in this room; joining anonymously");
            return NicknameRequest::anonymous();
        }
        match self.current_user.as_ref().map(|u| u.display_name().trim()) {
            Some(name) if !name.is_empty() => NicknameRequest::real_name(name),
            _ => {
                tracing::info!("Not logged in; joining anonymously");
                NicknameRequest::anonymous()
            }
        }
    }

    /// Wait for the next asynchronous completion
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Apply a completion to the state machine
    pub fn handle_event(&mut self, event: SessionEvent) -> SessionUpdate {
        if event.generation() != self.generation {
            tracing::debug!(
                "Ignoring event from generation {} (current {})",
                event.generation(),
                self.generation
            );
            if let SessionEvent::Connected {
                result: Ok(mut connection),
                ..
            } = event
            {
                connection.deactivate();
            }
            return SessionUpdate::Ignored;
        }

        match event {
            SessionEvent::NicknameAssigned { result, .. } => self.on_nickname(result),
            SessionEvent::HistoryLoaded { result, .. } => self.on_history(result),
            SessionEvent::Connected { result, .. } => self.on_connected(result),
            SessionEvent::Transport { event, .. } => self.on_transport_event(event),
        }
    }

    fn on_nickname(&mut self, result: Result<Nickname, ApiError>) -> SessionUpdate {
        if self.state != SessionState::NicknameRequested {
            return SessionUpdate::Ignored;
        }
        let nickname = match result {
            Ok(nickname) => nickname,
            Err(e) => return self.fail(SessionError::Nickname(e)),
        };
        let Some(session) = self.session.as_mut() else {
            return SessionUpdate::Ignored;
        };

        tracing::info!("Assigned nickname '{}'", nickname);
        session.nickname = Some(nickname.clone());
        let room_id = session.room.id;
        self.transition(SessionState::Connecting);

        if self.variant.replays_history() {
            let generation = self.generation;
            let api = Arc::clone(&self.api);
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                let result = api.recent_messages(room_id).await;
                tx.send(SessionEvent::HistoryLoaded { generation, result })
                    .ok();
            });
        } else {
            self.spawn_connect();
        }

        SessionUpdate::NicknameAssigned(nickname)
    }

    fn on_history(&mut self, result: Result<Vec<ChatMessage>, ApiError>) -> SessionUpdate {
        if self.state != SessionState::Connecting {
            return SessionUpdate::Ignored;
        }
        let Some(session) = self.session.as_mut() else {
            return SessionUpdate::Ignored;
        };

        let count = match result {
            Ok(history) => {
                tracing::debug!("Loaded {} messages of history", history.len());
                session.messages = history;
                session.messages.len()
            }
            Err(e) => {
                tracing::warn!("Failed to load history, starting empty: {}", e);
                0
            }
        };
        self.spawn_connect();

        SessionUpdate::HistoryLoaded(count)
    }

    fn spawn_connect(&self) {
        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let tx = self.events_tx.clone();
        let events = self.events_tx.clone();
        let on_event: EventCallback = Arc::new(move |event: TransportEvent| {
            events
                .send(SessionEvent::Transport { generation, event })
                .ok();
        });

        tokio::spawn(async move {
            let result = transport.connect(on_event).await;
            tx.send(SessionEvent::Connected { generation, result })
                .ok();
        });
    }

    fn on_connected(
        &mut self,
        result: Result<Box<dyn Connection>, TransportError>,
    ) -> SessionUpdate {
        let mut connection = match result {
            Ok(connection) => connection,
            Err(e) if self.state == SessionState::Connecting => {
                return self.fail(SessionError::Transport(e));
            }
            Err(_) => return SessionUpdate::Ignored,
        };
        if self.state != SessionState::Connecting {
            connection.deactivate();
            return SessionUpdate::Ignored;
        }
        let Some((room_id, nickname)) = self
            .session
            .as_ref()
            .and_then(|s| s.nickname.clone().map(|n| (s.room.id, n)))
        else {
            connection.deactivate();
            return SessionUpdate::Ignored;
        };

        let subscription = match connection.subscribe(&room_topic(room_id)) {
            Ok(subscription) => subscription,
            Err(e) => {
                connection.deactivate();
                return self.fail(SessionError::Transport(e));
            }
        };
        if let Err(e) = publish_body(
            connection.as_mut(),
            &join_destination(room_id),
            &MessageBody::join(&nickname),
        ) {
            tracing::warn!("Failed to publish JOIN: {}", e);
        }

        if let Some(session) = self.session.as_mut() {
            session.connection = Some(connection);
            session.subscription = Some(subscription);
        }
        self.connected = true;
        self.transition(SessionState::Joined);
        tracing::info!("Joined room {} as '{}'", room_id, nickname);

        SessionUpdate::Joined
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> SessionUpdate {
        match event {
            TransportEvent::Message { subscription, body } => {
                if self.state != SessionState::Joined {
                    return SessionUpdate::Ignored;
                }
                let Some(session) = self.session.as_mut() else {
                    return SessionUpdate::Ignored;
                };
                if session.subscription != Some(subscription) {
                    tracing::debug!("Dropping message for inactive subscription {}", subscription);
                    return SessionUpdate::Ignored;
                }
                match serde_json::from_str::<MessageBody>(&body) {
                    Ok(dto) => {
                        let message = ChatMessage::from(dto);
                        session.messages.push(message.clone());
                        SessionUpdate::MessageReceived(message)
                    }
                    Err(e) => {
                        tracing::warn!("Dropping unparseable message: {}", e);
                        SessionUpdate::Ignored
                    }
                }
            }
            TransportEvent::Error(reason) if self.is_attached() => {
                self.fail(SessionError::Transport(TransportError::Rejected(reason)))
            }
            TransportEvent::Closed if self.is_attached() => {
                self.fail(SessionError::Transport(TransportError::Closed))
            }
            _ => SessionUpdate::Ignored,
        }
    }

    fn is_attached(&self) -> bool {
        matches!(self.state, SessionState::Connecting | SessionState::Joined)
    }

    /// Send user text as a CHAT message
    ///
    /// Blank input is ignored (`Ok(false)`). On success the input buffer is
    /// cleared right away; delivery is not confirmed.
    ///
    /// # Errors
    ///
    /// * `SessionError::NotConnected` - no joined session
    /// * `SessionError::InvalidContent` - text longer than the allowed maximum
    pub fn send_message(&mut self, input: &mut String) -> Result<bool, SessionError> {
        if input.trim().is_empty() {
            return Ok(false);
        }
        if !self.connected || self.state != SessionState::Joined {
            return Err(SessionError::NotConnected);
        }
        let content = MessageContent::new(input.as_str()).map_err(SessionError::InvalidContent)?;

        let session = self.session.as_mut().ok_or(SessionError::NotConnected)?;
        let room_id = session.room.id;
        let (Some(nickname), Some(connection)) =
            (session.nickname.as_ref(), session.connection.as_mut())
        else {
            return Err(SessionError::NotConnected);
        };

        if let Err(e) = publish_body(
            connection.as_mut(),
            &send_destination(room_id),
            &MessageBody::chat(nickname, &content),
        ) {
            tracing::warn!("Failed to publish message: {}", e);
        }
        input.clear();

        Ok(true)
    }

    /// Tear down the active session
    ///
    /// Safe to call repeatedly: returns `false` when there was nothing to
    /// tear down. In the multi-room variant a LEAVE signal is published first
    /// if the session still has a nickname and a connection. The subscription
    /// is always released before the connection is deactivated.
    pub fn leave(&mut self) -> bool {
        if self.session.is_none() && self.state == SessionState::Idle {
            return false;
        }
        self.transition(SessionState::Leaving);

        let publishes_leave = self.variant.publishes_leave();
        if let Some(session) = self.session.as_mut() {
            let room_id = session.room.id;
            if publishes_leave
                && let (Some(nickname), Some(connection)) =
                    (session.nickname.as_ref(), session.connection.as_mut())
                && let Err(e) = publish_body(
                    connection.as_mut(),
                    &leave_destination(room_id),
                    &MessageBody::leave(nickname),
                )
            {
                tracing::warn!("Failed to publish LEAVE: {}", e);
            }
            tracing::info!("Leaving room {}", room_id);
        }

        self.release_handles();
        self.session = None;
        self.generation += 1;
        self.last_error = None;
        self.transition(SessionState::Idle);
        true
    }

    /// Release subscription then connection; no-op when already released
    fn release_handles(&mut self) {
        self.connected = false;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(subscription) = session.subscription.take()
            && let Some(connection) = session.connection.as_mut()
            && let Err(e) = connection.unsubscribe(subscription)
        {
            tracing::debug!("Unsubscribe failed: {}", e);
        }
        if let Some(mut connection) = session.connection.take() {
            connection.deactivate();
        }
    }

    fn fail(&mut self, error: SessionError) -> SessionUpdate {
        tracing::warn!("{}", error);
        self.release_handles();
        self.last_error = Some(error.clone());
        self.transition(SessionState::Errored);
        SessionUpdate::Failed(error)
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("Session state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn publish_body(
    connection: &mut dyn Connection,
    destination: &str,
    body: &MessageBody,
) -> Result<(), TransportError> {
    let json = serde_json::to_string(body).map_err(|e| TransportError::Protocol(e.to_string()))?;
    connection.publish(destination, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::MockChatApi,
        domain::{MessageType, RoomId},
        transport::fake::{FakeTransport, Recorder, emit},
    };
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - SessionManager の状態遷移（ニックネーム取得 → 接続 → 参加 → 退室）
    // - 購読ハンドルと接続ハンドルの整合性
    // - 退室処理の冪等性と解放順序
    // - 古い世代の非同期完了が無視されること
    //
    // 【どのようなシナリオをテストするか】
    // 1. 匿名参加・送信・受信
    // 2. ニックネーム取得前の退室
    // 3. 別ルームへの連続参加
    // 4. 接続失敗・切断
    // ========================================

    fn room(id: u64) -> ChatRoom {
        ChatRoom {
            id: RoomId::new(id).unwrap(),
            name: format!("room-{}", id),
            description: None,
            current_users: 0,
            max_users: None,
            created_at: None,
        }
    }

    /// Mock API handing out `匿名{room id * 42}` or the requested real name
    fn mock_api() -> MockChatApi {
        let mut api = MockChatApi::new();
        api.expect_assign_nickname().returning(|room, request| {
            let name = match request.user_name {
                Some(name) if !request.use_anonymous => name,
                _ => format!("匿名{}", room.value() * 42),
            };
            Ok(Nickname::new(name).unwrap())
        });
        api
    }

    fn create_manager(
        api: MockChatApi,
        variant: RoomVariant,
        user: Option<CurrentUser>,
        fail_with: Option<TransportError>,
    ) -> (SessionManager, Arc<Mutex<Recorder>>) {
        let transport = FakeTransport::new(fail_with);
        let recorder = Arc::clone(&transport.recorder);
        let manager = SessionManager::new(Arc::new(api), Arc::new(transport), variant, user);
        (manager, recorder)
    }

    /// Handle events until none arrive for a short while
    async fn pump(manager: &mut SessionManager) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), manager.next_event()).await
        {
            updates.push(manager.handle_event(event));
            assert!(manager.handles_consistent());
        }
        updates
    }

    fn inbound(sender: &str, content: &str, kind: &str) -> String {
        serde_json::json!({
            "id": 1,
            "senderNickname": sender,
            "content": content,
            "type": kind,
            "createdAt": "2024-05-01T12:00:00"
        })
        .to_string()
    }

    fn deliver(recorder: &Arc<Mutex<Recorder>>, connection: usize, body: String) {
        emit(
            recorder,
            connection,
            TransportEvent::Message {
                subscription: SubscriptionId::new(0),
                body,
            },
        );
    }

    #[tokio::test]
    async fn test_anonymous_join_send_and_receive() {
        // テスト項目: 匿名で参加し、割り当てられたニックネームで送受信できる
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);

        // when (操作): ルーム 1 を選択して参加
        manager.select_room(room(1), IdentityMode::Anonymous);
        assert_eq!(manager.state(), SessionState::NicknameRequested);
        let updates = pump(&mut manager).await;

        // then (期待する結果): 匿名42 として参加し、JOIN が送信される
        assert_eq!(
            updates,
            vec![
                SessionUpdate::NicknameAssigned(Nickname::new("匿名42").unwrap()),
                SessionUpdate::Joined,
            ]
        );
        assert_eq!(manager.state(), SessionState::Joined);
        assert!(manager.is_connected());
        {
            let recorder = recorder.lock().unwrap();
            assert_eq!(
                recorder.operations,
                vec![
                    "connect",
                    "subscribe /topic/chat/1",
                    "publish /app/chat/1/join"
                ]
            );
            let join: serde_json::Value = serde_json::from_str(&recorder.published[0].1).unwrap();
            assert_eq!(
                join,
                serde_json::json!({"senderNickname": "匿名42", "type": "JOIN"})
            );
        }

        // when (操作): "hello" を送信し、サーバーからのエコーを受信
        let mut input = "hello".to_string();
        let sent = manager.send_message(&mut input);
        deliver(&recorder, 0, inbound("匿名42", "hello", "CHAT"));
        let updates = pump(&mut manager).await;

        // then (期待する結果): 入力は即座にクリアされ、ログに CHAT が追加される
        assert_eq!(sent, Ok(true));
        assert!(input.is_empty());
        {
            let recorder = recorder.lock().unwrap();
            let (destination, body) = recorder.published.last().unwrap();
            assert_eq!(destination, "/app/chat/1/send");
            let chat: serde_json::Value = serde_json::from_str(body).unwrap();
            assert_eq!(
                chat,
                serde_json::json!({"senderNickname": "匿名42", "content": "hello", "type": "CHAT"})
            );
        }
        assert_eq!(updates.len(), 1);
        let log = manager.messages();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].sender, "匿名42");
        assert_eq!(log[0].content.as_deref(), Some("hello"));
        assert_eq!(log[0].kind, MessageType::Chat);
    }

    #[tokio::test]
    async fn test_every_chat_uses_assigned_nickname() {
        // テスト項目: 送信される全ての CHAT に割り当てられたニックネームが使われる
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);
        manager.select_room(room(1), IdentityMode::Anonymous);
        pump(&mut manager).await;

        // when (操作):
        for text in ["one", "two", "three"] {
            let mut input = text.to_string();
            manager.send_message(&mut input).unwrap();
        }

        // then (期待する結果):
        let recorder = recorder.lock().unwrap();
        let chats: Vec<serde_json::Value> = recorder
            .published
            .iter()
            .filter(|(destination, _)| destination.ends_with("/send"))
            .map(|(_, body)| serde_json::from_str(body).unwrap())
            .collect();
        assert_eq!(chats.len(), 3);
        assert!(chats.iter().all(|c| c["senderNickname"] == "匿名42"));
    }

    #[tokio::test]
    async fn test_blank_message_is_not_published() {
        // テスト項目: 空白のみのメッセージは送信されない
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);
        manager.select_room(room(1), IdentityMode::Anonymous);
        pump(&mut manager).await;
        let published_before = recorder.lock().unwrap().published.len();

        // when (操作):
        let mut empty = String::new();
        let mut blank = "   \t".to_string();
        let empty_result = manager.send_message(&mut empty);
        let blank_result = manager.send_message(&mut blank);

        // then (期待する結果):
        assert_eq!(empty_result, Ok(false));
        assert_eq!(blank_result, Ok(false));
        assert_eq!(recorder.lock().unwrap().published.len(), published_before);
    }

    #[tokio::test]
    async fn test_too_long_message_is_rejected_and_kept() {
        // テスト項目: 長すぎるメッセージは拒否され、入力は保持される
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);
        manager.select_room(room(1), IdentityMode::Anonymous);
        pump(&mut manager).await;
        let mut input = "x".repeat(crate::domain::MAX_CONTENT_CHARS + 1);

        // when (操作):
        let result = manager.send_message(&mut input);

        // then (期待する結果):
        assert!(matches!(result, Err(SessionError::InvalidContent(_))));
        assert_eq!(input.len(), crate::domain::MAX_CONTENT_CHARS + 1);
        assert_eq!(recorder.lock().unwrap().count("publish /app/chat/1/send"), 0);
    }

    #[tokio::test]
    async fn test_send_without_session_is_not_connected() {
        // テスト項目: 参加していない状態での送信はエラーになる
        // given (前提条件):
        let (mut manager, _recorder) =
            create_manager(MockChatApi::new(), RoomVariant::Global, None, None);
        let mut input = "hello".to_string();

        // when (操作):
        let result = manager.send_message(&mut input);

        // then (期待する結果):
        assert_eq!(result, Err(SessionError::NotConnected));
        assert_eq!(input, "hello");
    }

    #[tokio::test]
    async fn test_leave_twice_is_idempotent() {
        // テスト項目: 退室処理を二度呼んでも解放は一度だけ行われる
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);
        manager.select_room(room(1), IdentityMode::Anonymous);
        pump(&mut manager).await;

        // when (操作):
        let first = manager.leave();
        let second = manager.leave();

        // then (期待する結果):
        assert!(first);
        assert!(!second);
        assert_eq!(manager.state(), SessionState::Idle);
        assert!(manager.handles_consistent());
        assert!(manager.messages().is_empty());
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.count("unsubscribe"), 1);
        assert_eq!(recorder.count("deactivate"), 1);
    }

    #[tokio::test]
    async fn test_global_leave_does_not_publish_leave() {
        // テスト項目: Global ではクライアントから LEAVE を送信しない
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);
        manager.select_room(room(1), IdentityMode::Anonymous);
        pump(&mut manager).await;

        // when (操作):
        manager.leave();

        // then (期待する結果):
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.count("publish /app/chat/1/leave"), 0);
        let unsubscribe = recorder.position("unsubscribe sub-0").unwrap();
        let deactivate = recorder.position("deactivate").unwrap();
        assert!(unsubscribe < deactivate);
    }

    #[tokio::test]
    async fn test_multi_room_leave_publishes_leave_before_teardown() {
        // テスト項目: MultiRoom では解放前に LEAVE を送信する
        // given (前提条件):
        let mut api = mock_api();
        api.expect_recent_messages().returning(|_| Ok(Vec::new()));
        let (mut manager, recorder) = create_manager(api, RoomVariant::MultiRoom, None, None);
        manager.select_room(room(2), IdentityMode::Anonymous);
        pump(&mut manager).await;

        // when (操作):
        manager.leave();

        // then (期待する結果):
        let recorder = recorder.lock().unwrap();
        let leave = recorder.position("publish /app/chat/2/leave").unwrap();
        let unsubscribe = recorder.position("unsubscribe sub-0").unwrap();
        let deactivate = recorder.position("deactivate").unwrap();
        assert!(leave < unsubscribe);
        assert!(unsubscribe < deactivate);
        let (_, body) = &recorder.published[1];
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"senderNickname": "匿名84", "type": "LEAVE"})
        );
    }

    #[tokio::test]
    async fn test_multi_room_leave_without_connection_skips_leave() {
        // テスト項目: 接続がまだない場合は MultiRoom でも LEAVE を送信しない
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::MultiRoom, None, None);
        manager.select_room(room(2), IdentityMode::Anonymous);

        // when (操作): ニックネーム取得前に退室
        manager.leave();

        // then (期待する結果):
        assert!(recorder.lock().unwrap().operations.is_empty());
    }

    #[tokio::test]
    async fn test_leave_before_nickname_resolves() {
        // テスト項目: ニックネーム取得完了前に退室すると、完了しても Connecting に進まない
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);
        manager.select_room(room(1), IdentityMode::Anonymous);

        // when (操作):
        manager.leave();
        let updates = pump(&mut manager).await;

        // then (期待する結果):
        assert_eq!(updates, vec![SessionUpdate::Ignored]);
        assert_eq!(manager.state(), SessionState::Idle);
        assert!(manager.nickname().is_none());
        assert_eq!(recorder.lock().unwrap().count("connect"), 0);
    }

    #[tokio::test]
    async fn test_stale_connection_is_deactivated() {
        // テスト項目: 退室後に完了した接続は購読されずに切断される
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);
        manager.select_room(room(1), IdentityMode::Anonymous);
        let event = manager.next_event().await.unwrap();
        manager.handle_event(event);
        assert_eq!(manager.state(), SessionState::Connecting);

        // when (操作): 接続完了前に退室
        manager.leave();
        let updates = pump(&mut manager).await;

        // then (期待する結果):
        assert_eq!(updates, vec![SessionUpdate::Ignored]);
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.operations, vec!["connect", "deactivate"]);
    }

    #[tokio::test]
    async fn test_switching_rooms_tears_down_first_session() {
        // テスト項目: 別ルームに参加する前に最初のセッションが完全に解放される
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);
        manager.select_room(room(1), IdentityMode::Anonymous);
        pump(&mut manager).await;

        // when (操作): ルーム 3 を選択
        manager.select_room(room(3), IdentityMode::Anonymous);
        pump(&mut manager).await;

        // then (期待する結果): ルーム 1 の解放が 2 回目の接続より前に行われる
        {
            let recorder = recorder.lock().unwrap();
            assert_eq!(
                recorder.operations,
                vec![
                    "connect",
                    "subscribe /topic/chat/1",
                    "publish /app/chat/1/join",
                    "unsubscribe sub-0",
                    "deactivate",
                    "connect",
                    "subscribe /topic/chat/3",
                    "publish /app/chat/3/join",
                ]
            );
        }
        assert_eq!(manager.room().unwrap().id.value(), 3);
        assert_eq!(manager.nickname().unwrap().as_str(), "匿名126");

        // when (操作): ルーム 1 の接続から遅れてメッセージが届く
        deliver(&recorder, 0, inbound("someone", "late", "CHAT"));
        deliver(&recorder, 1, inbound("匿名126", "here", "CHAT"));
        pump(&mut manager).await;

        // then (期待する結果): ルーム 3 のログにはルーム 3 のメッセージだけが入る
        let log = manager.messages();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].content.as_deref(), Some("here"));
    }

    #[tokio::test]
    async fn test_real_name_is_snapshotted_at_join() {
        // テスト項目: 実名参加のニックネームは参加時点の表示名になる
        // given (前提条件):
        let mut api = mock_api();
        api.expect_recent_messages().returning(|_| Ok(Vec::new()));
        let (mut manager, recorder) = create_manager(
            api,
            RoomVariant::MultiRoom,
            Some(CurrentUser::new("田中")),
            None,
        );
        assert_eq!(
            manager.identity_choices(),
            vec![IdentityMode::Anonymous, IdentityMode::RealName]
        );

        // when (操作): 参加直後に保存されたユーザー情報が変わる
        manager.select_room(room(2), IdentityMode::RealName);
        manager.set_current_user(Some(CurrentUser::new("佐藤")));
        pump(&mut manager).await;
        let mut input = "こんにちは".to_string();
        manager.send_message(&mut input).unwrap();

        // then (期待する結果):
        assert_eq!(manager.nickname().unwrap().as_str(), "田中");
        let recorder = recorder.lock().unwrap();
        let (_, body) = recorder.published.last().unwrap();
        let chat: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(chat["senderNickname"], "田中");
    }

    #[tokio::test]
    async fn test_real_name_requires_login() {
        // テスト項目: 未ログインで実名を選んでも匿名で参加する
        // given (前提条件):
        let mut api = MockChatApi::new();
        api.expect_assign_nickname()
            .withf(|_, request| request.use_anonymous && request.user_name.is_none())
            .times(1)
            .returning(|_, _| Ok(Nickname::new("匿名7").unwrap()));
        api.expect_recent_messages().returning(|_| Ok(Vec::new()));
        let (mut manager, _recorder) = create_manager(api, RoomVariant::MultiRoom, None, None);
        assert_eq!(manager.identity_choices(), vec![IdentityMode::Anonymous]);

        // when (操作):
        manager.select_room(room(2), IdentityMode::RealName);
        pump(&mut manager).await;

        // then (期待する結果):
        assert_eq!(manager.nickname().unwrap().as_str(), "匿名7");
    }

    #[tokio::test]
    async fn test_global_room_is_always_anonymous() {
        // テスト項目: Global ではログイン済みでも匿名で参加する
        // given (前提条件):
        let mut api = MockChatApi::new();
        api.expect_assign_nickname()
            .withf(|_, request| request.use_anonymous)
            .times(1)
            .returning(|_, _| Ok(Nickname::new("匿名1").unwrap()));
        let (mut manager, _recorder) = create_manager(
            api,
            RoomVariant::Global,
            Some(CurrentUser::new("田中")),
            None,
        );
        assert_eq!(manager.identity_choices(), vec![IdentityMode::Anonymous]);

        // when (操作):
        manager.select_room(room(1), IdentityMode::RealName);
        pump(&mut manager).await;

        // then (期待する結果):
        assert_eq!(manager.nickname().unwrap().as_str(), "匿名1");
    }

    #[tokio::test]
    async fn test_multi_room_replays_history() {
        // テスト項目: MultiRoom では参加時に履歴がログに読み込まれる
        // given (前提条件):
        let mut api = mock_api();
        api.expect_recent_messages().times(1).returning(|_| {
            Ok(vec![
                ChatMessage {
                    id: Some(1),
                    sender: "匿名1".to_string(),
                    content: Some("earlier".to_string()),
                    kind: MessageType::Chat,
                    created_at: None,
                },
                ChatMessage {
                    id: Some(2),
                    sender: "匿名2".to_string(),
                    content: Some("匿名2さんが入室しました".to_string()),
                    kind: MessageType::Join,
                    created_at: None,
                },
            ])
        });
        let (mut manager, recorder) = create_manager(api, RoomVariant::MultiRoom, None, None);

        // when (操作):
        manager.select_room(room(2), IdentityMode::Anonymous);
        let updates = pump(&mut manager).await;

        // then (期待する結果): 履歴の読み込み後に接続される
        assert_eq!(
            updates,
            vec![
                SessionUpdate::NicknameAssigned(Nickname::new("匿名84").unwrap()),
                SessionUpdate::HistoryLoaded(2),
                SessionUpdate::Joined,
            ]
        );
        assert_eq!(manager.messages().len(), 2);
        assert_eq!(manager.messages()[0].content.as_deref(), Some("earlier"));
        assert_eq!(recorder.lock().unwrap().count("connect"), 1);
    }

    #[tokio::test]
    async fn test_history_failure_still_joins() {
        // テスト項目: 履歴取得に失敗しても空のログで参加する
        // given (前提条件):
        let mut api = mock_api();
        api.expect_recent_messages()
            .returning(|_| Err(ApiError::Request("timeout".to_string())));
        let (mut manager, _recorder) = create_manager(api, RoomVariant::MultiRoom, None, None);

        // when (操作):
        manager.select_room(room(2), IdentityMode::Anonymous);
        pump(&mut manager).await;

        // then (期待する結果):
        assert_eq!(manager.state(), SessionState::Joined);
        assert!(manager.messages().is_empty());
    }

    #[tokio::test]
    async fn test_global_does_not_fetch_history() {
        // テスト項目: Global では履歴を取得しない
        // given (前提条件):
        let mut api = mock_api();
        api.expect_recent_messages().never();
        let (mut manager, _recorder) = create_manager(api, RoomVariant::Global, None, None);

        // when (操作):
        manager.select_room(room(1), IdentityMode::Anonymous);
        pump(&mut manager).await;

        // then (期待する結果):
        assert_eq!(manager.state(), SessionState::Joined);
        assert!(manager.messages().is_empty());
    }

    #[tokio::test]
    async fn test_nickname_failure_is_terminal() {
        // テスト項目: ニックネーム取得失敗でエラー状態になり、再試行しない
        // given (前提条件):
        let mut api = MockChatApi::new();
        api.expect_assign_nickname().times(1).returning(|_, _| {
            Err(ApiError::Status {
                status: 500,
                url: "http://backend/rooms/1/nickname".to_string(),
            })
        });
        let (mut manager, recorder) = create_manager(api, RoomVariant::Global, None, None);

        // when (操作):
        manager.select_room(room(1), IdentityMode::Anonymous);
        let updates = pump(&mut manager).await;

        // then (期待する結果):
        assert_eq!(updates.len(), 1);
        assert!(matches!(
            updates[0],
            SessionUpdate::Failed(SessionError::Nickname(_))
        ));
        assert_eq!(manager.state(), SessionState::Errored);
        assert!(!manager.is_connected());
        assert!(matches!(
            manager.last_error(),
            Some(SessionError::Nickname(ApiError::Status { status: 500, .. }))
        ));
        assert_eq!(recorder.lock().unwrap().count("connect"), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_disables_sending() {
        // テスト項目: 接続失敗でエラー状態になり、送信が無効になる
        // given (前提条件):
        let (mut manager, _recorder) = create_manager(
            mock_api(),
            RoomVariant::Global,
            None,
            Some(TransportError::Connect("refused".to_string())),
        );

        // when (操作):
        manager.select_room(room(1), IdentityMode::Anonymous);
        pump(&mut manager).await;
        let mut input = "hello".to_string();
        let result = manager.send_message(&mut input);

        // then (期待する結果):
        assert_eq!(manager.state(), SessionState::Errored);
        assert!(!manager.is_connected());
        assert_eq!(
            manager.last_error(),
            Some(&SessionError::Transport(TransportError::Connect(
                "refused".to_string()
            )))
        );
        assert_eq!(result, Err(SessionError::NotConnected));
    }

    #[tokio::test]
    async fn test_connection_drop_releases_handles() {
        // テスト項目: 参加中に切断されると、ハンドルが解放されエラー状態になる
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);
        manager.select_room(room(1), IdentityMode::Anonymous);
        pump(&mut manager).await;

        // when (操作):
        emit(&recorder, 0, TransportEvent::Closed);
        let updates = pump(&mut manager).await;

        // then (期待する結果):
        assert_eq!(
            updates,
            vec![SessionUpdate::Failed(SessionError::Transport(
                TransportError::Closed
            ))]
        );
        assert_eq!(manager.state(), SessionState::Errored);
        assert!(!manager.is_connected());
        {
            let recorder = recorder.lock().unwrap();
            assert_eq!(recorder.count("unsubscribe"), 1);
            assert_eq!(recorder.count("deactivate"), 1);
        }

        // when (操作): エラー後の退室
        let left = manager.leave();

        // then (期待する結果): 追加の解放は行われない
        assert!(left);
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(recorder.lock().unwrap().count("deactivate"), 1);
    }

    #[tokio::test]
    async fn test_broker_error_while_joined_fails_session() {
        // テスト項目: 参加中にブローカーからエラーが届くと、ハンドルが解放されエラー状態になる
        // given (前提条件):
        let mut api = mock_api();
        api.expect_recent_messages().returning(|_| Ok(Vec::new()));
        let (mut manager, recorder) = create_manager(api, RoomVariant::MultiRoom, None, None);
        manager.select_room(room(2), IdentityMode::Anonymous);
        pump(&mut manager).await;
        assert_eq!(manager.state(), SessionState::Joined);

        // when (操作):
        emit(&recorder, 0, TransportEvent::Error("boom".to_string()));
        let updates = pump(&mut manager).await;
        let mut input = "hello".to_string();
        let sent = manager.send_message(&mut input);

        // then (期待する結果): 送信は無効になり、LEAVE は送られない
        assert_eq!(
            updates,
            vec![SessionUpdate::Failed(SessionError::Transport(
                TransportError::Rejected("boom".to_string())
            ))]
        );
        assert_eq!(manager.state(), SessionState::Errored);
        assert!(!manager.is_connected());
        assert_eq!(sent, Err(SessionError::NotConnected));
        assert_eq!(input, "hello");
        assert_eq!(
            recorder.lock().unwrap().operations,
            vec![
                "connect",
                "subscribe /topic/chat/2",
                "publish /app/chat/2/join",
                "unsubscribe sub-0",
                "deactivate",
            ]
        );

        // when (操作): 続けて切断が通知される
        emit(&recorder, 0, TransportEvent::Closed);
        let updates = pump(&mut manager).await;

        // then (期待する結果): エラー状態のまま何も起きない
        assert_eq!(updates, vec![SessionUpdate::Ignored]);
        assert_eq!(
            manager.last_error(),
            Some(&SessionError::Transport(TransportError::Rejected(
                "boom".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn test_unparseable_message_is_dropped() {
        // テスト項目: 解析できないメッセージはログに追加されない
        // given (前提条件):
        let (mut manager, recorder) =
            create_manager(mock_api(), RoomVariant::Global, None, None);
        manager.select_room(room(1), IdentityMode::Anonymous);
        pump(&mut manager).await;

        // when (操作):
        deliver(&recorder, 0, "not json".to_string());
        deliver(&recorder, 0, inbound("匿名9", "first", "CHAT"));
        deliver(&recorder, 0, inbound("匿名9", "second", "CHAT"));
        let updates = pump(&mut manager).await;

        // then (期待する結果): 到着順にログへ追加される
        assert_eq!(updates[0], SessionUpdate::Ignored);
        let contents: Vec<_> = manager
            .messages()
            .iter()
            .map(|m| m.content.clone().unwrap())
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }
}
