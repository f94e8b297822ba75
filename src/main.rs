use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use log::info;

use chatroom_client::config::ClientConfig;
use chatroom_client::console;
use chatroom_client::media::StaticMediaSource;
use chatroom_client::relay::RelayClient;
use chatroom_client::session::SessionController;

/// Terminal client for the group chat relay: messaging, attachments, voice
/// and screen share.
#[derive(Parser, Debug)]
#[clap(name = "chatroom-client", version, about)]
struct Args {
    /// Relay WebSocket URL (overrides RELAY_URL)
    #[clap(long, value_name = "URL")]
    relay: Option<String>,

    /// Display name (overrides CHAT_USERNAME; prompted for if absent)
    #[clap(long, value_name = "NAME")]
    username: Option<String>,

    /// STUN server for voice connections (overrides STUN_SERVER)
    #[clap(long, value_name = "URL")]
    stun: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let mut config = ClientConfig::from_env();
    if let Some(relay) = args.relay {
        config.relay_url = relay;
    }
    if let Some(username) = args.username {
        config.username = Some(username);
    }
    if let Some(stun) = args.stun {
        config.stun_server = stun;
    }

    let username = match config.username.clone() {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => prompt_username()?,
    };

    info!("Joining {} as {}", config.relay_url, username);

    let relay = RelayClient::new(
        &config.relay_url,
        config.retry_attempts,
        config.retry_delay_ms,
    );
    let (handle, updates) = relay.spawn();

    let (controller, commands, view) =
        SessionController::new(config, username, handle, updates, Arc::new(StaticMediaSource));

    let renderer = tokio::spawn(console::render(view));
    let input = console::spawn_input(commands);

    controller.run().await?;

    input.abort();
    let _ = renderer.await;
    Ok(())
}

fn prompt_username() -> Result<String> {
    loop {
        print!("Choose a username: ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            anyhow::bail!("no username provided");
        }
        let name = line.trim();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
    }
}
