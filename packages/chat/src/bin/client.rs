//! Terminal chat client for the hiroba community board.
//!
//! In the global variant the client joins the single anonymous room at start.
//! In the multi-room variant rooms are listed, created and joined with
//! commands, optionally under the logged-in user's real name.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hiroba-chat
//! cargo run --bin hiroba-chat -- --variant multi --user-name 田中
//! cargo run --bin hiroba-chat -- --variant multi --user-file ./user.json
//! ```

use std::path::PathBuf;

use clap::Parser;

use hiroba_chat::{
    api::DEFAULT_API_URL,
    config::{ClientConfig, resolve_current_user},
    domain::RoomVariant,
    error::ClientError,
    runner::run_client,
    transport::DEFAULT_WS_URL,
};
use hiroba_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "hiroba-chat")]
#[command(about = "Chat client for the hiroba community board", long_about = None)]
struct Args {
    /// Base URL of the chat REST API
    #[arg(short = 'a', long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// WebSocket URL of the STOMP broker
    #[arg(short = 'w', long, default_value = DEFAULT_WS_URL)]
    ws_url: String,

    /// Room model: "global" (single anonymous room) or "multi"
    #[arg(short = 'v', long, default_value = "global")]
    variant: RoomVariant,

    /// Display name of the logged-in user
    #[arg(short = 'n', long)]
    user_name: Option<String>,

    /// JSON file holding the logged-in user (takes precedence over --user-name)
    #[arg(short = 'f', long)]
    user_file: Option<PathBuf>,
}

async fn run(args: Args) -> Result<(), ClientError> {
    let current_user = resolve_current_user(args.user_file.as_deref(), args.user_name.as_deref())?;
    let config = ClientConfig::new(args.api_url, args.ws_url, args.variant, current_user)?;
    run_client(config).await
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
