//! Message formatting utilities for terminal display.

use chrono::NaiveDateTime;
use hiroba_shared::time::format_clock_time;

use crate::{
    domain::{ChatMessage, ChatRoom, MessageType, Nickname, RoomVariant},
    session::SessionState,
};

const RULE: &str = "============================================================";

/// Message formatter for terminal display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format one log entry
    ///
    /// # Arguments
    ///
    /// * `message` - The message to render
    /// * `me` - The session's own nickname, to mark own messages
    ///
    /// # Returns
    ///
    /// A single line, without trailing newline
    pub fn format_message(message: &ChatMessage, me: Option<&Nickname>) -> String {
        if message.is_system() {
            return Self::format_system_message(message);
        }

        let is_me = me.is_some_and(|n| n.as_str() == message.sender);
        let me_suffix = if is_me { " (me)" } else { "" };
        let time = message
            .created_at
            .as_ref()
            .map(|t| format!(" ({})", format_clock_time(t)))
            .unwrap_or_default();
        format!(
            "@{}{}: {}{}",
            message.sender,
            me_suffix,
            message.content.as_deref().unwrap_or(""),
            time
        )
    }

    /// JOIN / LEAVE notice; the backend's text is used when it sent one
    fn format_system_message(message: &ChatMessage) -> String {
        let (marker, fallback) = match message.kind {
            MessageType::Join => ("+", "entered the room"),
            _ => ("-", "left the room"),
        };
        match message.content.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => format!("{} {}", marker, text),
            _ => format!("{} {} {}", marker, message.sender, fallback),
        }
    }

    /// Confirmation printed once a message has been handed to the transport
    pub fn format_sent_confirmation(sent_at: &NaiveDateTime) -> String {
        format!("sent at {}", format_clock_time(sent_at))
    }

    /// Format the room list
    pub fn format_room_list(rooms: &[ChatRoom]) -> String {
        let mut output = String::new();
        output.push_str(RULE);
        output.push_str("\nRooms:\n");

        if rooms.is_empty() {
            output.push_str("(No rooms)\n");
        } else {
            for room in rooms {
                let capacity = match room.max_users {
                    Some(max) => format!("{}/{}", room.current_users, max),
                    None => room.current_users.to_string(),
                };
                output.push_str(&format!("[{}] {} ({} users)", room.id, room.name, capacity));
                if let Some(description) = &room.description {
                    output.push_str(&format!(" - {}", description));
                }
                output.push('\n');
            }
        }

        output.push_str(RULE);
        output.push('\n');
        output
    }

    /// Banner shown after joining, with any replayed history
    pub fn format_joined(
        room: &ChatRoom,
        nickname: &Nickname,
        history: &[ChatMessage],
    ) -> String {
        let mut output = String::new();
        output.push_str(RULE);
        output.push_str(&format!(
            "\nJoined [{}] {} as '{}'\n",
            room.id, room.name, nickname
        ));
        for message in history {
            output.push_str(&Self::format_message(message, Some(nickname)));
            output.push('\n');
        }
        output.push_str(RULE);
        output.push('\n');
        output
    }

    /// One-line description of the session state
    pub fn format_status(
        variant: RoomVariant,
        state: SessionState,
        room: Option<&ChatRoom>,
        nickname: Option<&Nickname>,
    ) -> String {
        let variant = match variant {
            RoomVariant::Global => "global",
            RoomVariant::MultiRoom => "multi-room",
        };
        let state = match state {
            SessionState::Idle => "idle",
            SessionState::NicknameRequested => "requesting nickname",
            SessionState::Connecting => "connecting",
            SessionState::Joined => "joined",
            SessionState::Leaving => "leaving",
            SessionState::Errored => "error",
        };
        let mut line = format!("[{}] {}", variant, state);
        if let Some(room) = room {
            line.push_str(&format!(" in [{}] {}", room.id, room.name));
        }
        if let Some(nickname) = nickname {
            line.push_str(&format!(" as '{}'", nickname));
        }
        line
    }

    /// Command help
    pub fn format_help(variant: RoomVariant) -> String {
        let mut output = String::from("Commands:\n");
        if variant == RoomVariant::MultiRoom {
            output.push_str("  /rooms                         list rooms\n");
            output.push_str("  /create <name> [| description] create a room\n");
            output.push_str("  /join <id> [anon|real]         join a room\n");
            output.push_str("  /delete <id>                   delete a room\n");
        } else {
            output.push_str("  /join                          rejoin the global room\n");
        }
        output.push_str("  /leave                         leave the current room\n");
        output.push_str("  /status                        show the session state\n");
        output.push_str("  /help                          show this help\n");
        output.push_str("  /quit                          leave and exit\n");
        output.push_str("Any other line is sent as a message.\n");
        output
    }
}
