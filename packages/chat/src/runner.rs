//! Terminal client event loop.
//!
//! One task owns the `SessionManager` and multiplexes session completions,
//! lines typed by the user and Ctrl+C. Leaving the loop for any reason tears
//! the session down.

use std::sync::Arc;

use hiroba_shared::time::{Clock, SystemClock};
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::sync::mpsc;

use crate::{
    api::{ChatApi, HttpChatApi},
    config::ClientConfig,
    domain::{ChatRoom, GLOBAL_ROOM_ID, IdentityMode, RoomId, RoomVariant},
    error::{ApiError, ClientError},
    formatter::MessageFormatter,
    session::{SessionManager, SessionUpdate},
    transport::{StompTransport, Transport},
    ui::{PROMPT, print_block, redisplay_prompt},
};

/// A parsed line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Rooms,
    Create {
        name: String,
        description: Option<String>,
    },
    /// `room` is `None` for a bare `/join`
    Join {
        room: Option<RoomId>,
        identity: IdentityMode,
    },
    Delete {
        room: RoomId,
    },
    Leave,
    Status,
    Help,
    Quit,
    /// Anything that is not a command
    Say(String),
}

impl UserCommand {
    /// Parse one input line
    ///
    /// # Errors
    ///
    /// Returns a usage message for malformed commands.
    pub fn parse(line: &str) -> Result<Self, String> {
        let trimmed = line.trim();
        let Some(command) = trimmed.strip_prefix('/') else {
            return Ok(Self::Say(line.to_string()));
        };
        let (name, args) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, args)| (name, args.trim()));

        match name {
            "rooms" => Ok(Self::Rooms),
            "create" => {
                let (room_name, description) = match args.split_once('|') {
                    Some((room_name, description)) => {
                        let description = description.trim();
                        (
                            room_name.trim(),
                            (!description.is_empty()).then(|| description.to_string()),
                        )
                    }
                    None => (args, None),
                };
                if room_name.is_empty() {
                    return Err("usage: /create <name> [| description]".to_string());
                }
                Ok(Self::Create {
                    name: room_name.to_string(),
                    description,
                })
            }
            "join" => {
                let mut parts = args.split_whitespace();
                let room = parts
                    .next()
                    .map(|id| id.parse::<RoomId>().map_err(|e| e.to_string()))
                    .transpose()?;
                let identity = parts
                    .next()
                    .map(str::parse::<IdentityMode>)
                    .transpose()?
                    .unwrap_or(IdentityMode::Anonymous);
                Ok(Self::Join { room, identity })
            }
            "delete" => {
                let room = args
                    .parse::<RoomId>()
                    .map_err(|_| "usage: /delete <id>".to_string())?;
                Ok(Self::Delete { room })
            }
            "leave" => Ok(Self::Leave),
            "status" => Ok(Self::Status),
            "help" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '/{}'; type /help", other)),
        }
    }
}

/// What the event loop does after a line was handled
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Print(String),
    Prompt,
    Quit,
}

/// Run the terminal client until the user exits
///
/// # Errors
///
/// Returns `ClientError` if the HTTP client cannot be created.
pub async fn run_client(config: ClientConfig) -> Result<(), ClientError> {
    let api: Arc<dyn ChatApi> = Arc::new(HttpChatApi::new(config.api_url.as_str())?);
    let transport: Arc<dyn Transport> = Arc::new(StompTransport::new(config.ws_url.as_str()));
    let mut manager = SessionManager::new(
        Arc::clone(&api),
        transport,
        config.variant,
        config.current_user.clone(),
    );
    let clock = SystemClock;

    tracing::info!(
        "Starting {:?} chat client (api: {}, broker: {})",
        config.variant,
        config.api_url,
        config.ws_url
    );
    match manager.current_user() {
        Some(user) => println!("\nLogged in as '{}'.", user.display_name()),
        None => println!("\nNot logged in; rooms are joined anonymously."),
    }
    println!("{}", MessageFormatter::format_help(config.variant));

    if config.variant == RoomVariant::Global {
        join_global(api.as_ref(), &mut manager).await;
    }

    let mut input_rx = spawn_input_thread();

    loop {
        tokio::select! {
            Some(event) = manager.next_event() => {
                let update = manager.handle_event(event);
                render_update(&manager, update);
            }
            line = input_rx.recv() => {
                let Some(line) = line else {
                    tracing::info!("Input closed");
                    break;
                };
                match handle_line(&line, api.as_ref(), &mut manager, &clock).await {
                    Reply::Print(text) => print_block(&text),
                    Reply::Prompt => redisplay_prompt(),
                    Reply::Quit => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    manager.leave();
    println!("\nBye.");
    Ok(())
}

/// Read lines on a blocking thread and forward them to the event loop
fn spawn_input_thread() -> mpsc::UnboundedReceiver<String> {
    let (input_tx, input_rx) = mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                tracing::error!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline(PROMPT) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str()).ok();
                    }
                    if input_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    input_rx
}

async fn join_global(api: &dyn ChatApi, manager: &mut SessionManager) {
    let room = match api.get_room(GLOBAL_ROOM_ID).await {
        Ok(room) => room,
        Err(e) => {
            tracing::warn!("Could not load the global room, using defaults: {}", e);
            ChatRoom::global()
        }
    };
    manager.select_room(room, IdentityMode::Anonymous);
}

async fn handle_line(
    line: &str,
    api: &dyn ChatApi,
    manager: &mut SessionManager,
    clock: &dyn Clock,
) -> Reply {
    let command = match UserCommand::parse(line) {
        Ok(command) => command,
        Err(usage) => return Reply::Print(usage),
    };
    let variant = manager.variant();

    match command {
        UserCommand::Say(text) => {
            let mut input = text;
            match manager.send_message(&mut input) {
                Ok(true) => Reply::Print(MessageFormatter::format_sent_confirmation(
                    &clock.now_jst(),
                )),
                Ok(false) => Reply::Prompt,
                Err(e) => Reply::Print(e.to_string()),
            }
        }
        UserCommand::Rooms if variant == RoomVariant::MultiRoom => match api.list_rooms().await {
            Ok(rooms) => Reply::Print(MessageFormatter::format_room_list(&rooms)),
            Err(e) => Reply::Print(format!("Could not list rooms: {}", e)),
        },
        UserCommand::Create { name, description } if variant == RoomVariant::MultiRoom => {
            match api.create_room(name, description).await {
                Ok(room) => Reply::Print(format!(
                    "Created [{}] {}; type /join {} to enter",
                    room.id, room.name, room.id
                )),
                Err(e) => Reply::Print(format!("Could not create room: {}", e)),
            }
        }
        UserCommand::Delete { room } if variant == RoomVariant::MultiRoom => {
            if manager.room().is_some_and(|current| current.id == room) {
                manager.leave();
            }
            match api.delete_room(room).await {
                Ok(()) => Reply::Print(format!("Deleted room {}", room)),
                Err(ApiError::RoomNotFound(id)) => Reply::Print(format!("No room {}", id)),
                Err(e) => Reply::Print(format!("Could not delete room {}: {}", room, e)),
            }
        }
        UserCommand::Rooms | UserCommand::Create { .. } | UserCommand::Delete { .. } => {
            Reply::Print("Only available in multi-room mode".to_string())
        }
        UserCommand::Join { .. } if variant == RoomVariant::Global => {
            join_global(api, manager).await;
            Reply::Prompt
        }
        UserCommand::Join { room: None, .. } => {
            Reply::Print("usage: /join <id> [anon|real]".to_string())
        }
        UserCommand::Join {
            room: Some(room_id),
            identity,
        } => match api.get_room(room_id).await {
            Ok(room) => {
                manager.select_room(room, identity);
                if manager.identity_choices().contains(&identity) {
                    Reply::Prompt
                } else {
                    Reply::Print(
                        "Real-name identity needs a logged-in user; joining anonymously"
                            .to_string(),
                    )
                }
            }
            Err(ApiError::RoomNotFound(id)) => Reply::Print(format!("No room {}", id)),
            Err(e) => Reply::Print(format!("Could not load room {}: {}", room_id, e)),
        },
        UserCommand::Leave => {
            if manager.leave() {
                Reply::Print("Left the room".to_string())
            } else {
                Reply::Print("Not in a room".to_string())
            }
        }
        UserCommand::Status => Reply::Print(MessageFormatter::format_status(
            variant,
            manager.state(),
            manager.room(),
            manager.nickname(),
        )),
        UserCommand::Help => Reply::Print(MessageFormatter::format_help(variant)),
        UserCommand::Quit => Reply::Quit,
    }
}

fn render_update(manager: &SessionManager, update: SessionUpdate) {
    match update {
        SessionUpdate::NicknameAssigned(nickname) => {
            print_block(&format!("Your nickname is '{}'; connecting...", nickname))
        }
        SessionUpdate::HistoryLoaded(count) => {
            tracing::debug!("{} messages of history loaded", count);
        }
        SessionUpdate::Joined => {
            if let (Some(room), Some(nickname)) = (manager.room(), manager.nickname()) {
                print_block(&MessageFormatter::format_joined(
                    room,
                    nickname,
                    manager.messages(),
                ));
            }
        }
        SessionUpdate::MessageReceived(message) => print_block(&MessageFormatter::format_message(
            &message,
            manager.nickname(),
        )),
        SessionUpdate::Failed(e) => print_block(&format!("! {}", e)),
        SessionUpdate::Ignored => {}
    }
}
