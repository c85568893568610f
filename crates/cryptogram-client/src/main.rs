#![forbid(unsafe_code)]

use std::io::{self, BufRead};
use std::thread;

use anyhow::Result;
use clap::Parser;
use cryptogram_client::{
    parse_input, run_client, ClientCommand, ClientConfig, ClientEvent, ConnectionState, Input,
    HELP_TEXT,
};
use cryptogram_common::{init_tracing_with_default, resolve_server_addr};
use gram_core::DEFAULT_SERVER_PORT;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cryptogram-client")]
#[command(about = "CryptoGram peer - encrypted chat through a relay")]
struct Args {
    /// Relay address, host or host:port
    #[arg(long, default_value = "127.0.0.1")]
    server: String,

    /// Username to request from the relay
    #[arg(long)]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing_with_default("warn");
    let args = Args::parse();

    let config = ClientConfig {
        server_addr: resolve_server_addr(&args.server, DEFAULT_SERVER_PORT)?,
        username: args.name,
    };
    info!("Connecting to {}", config.server_addr);

    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let session = tokio::spawn(run_client(config, command_rx, event_tx));

    // Blocking stdin lives on its own thread so it never holds up shutdown.
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_input(&line) {
                Some(Input::Command(command)) => {
                    let quit = command == ClientCommand::Logout;
                    if command_tx.blocking_send(command).is_err() || quit {
                        return;
                    }
                }
                Some(Input::Help) => println!("{HELP_TEXT}"),
                Some(Input::Usage(text)) => println!("{text}"),
                None => {}
            }
        }
        let _ = command_tx.blocking_send(ClientCommand::Logout);
    });

    while let Some(event) = event_rx.recv().await {
        render(&event);
    }

    session.await??;
    Ok(())
}

fn render(event: &ClientEvent) {
    match event {
        ClientEvent::Log(line) => println!("* {line}"),
        ClientEvent::StateChanged(ConnectionState::Closed) => println!("* Disconnected."),
        ClientEvent::StateChanged(_) => {}
        ClientEvent::LoggedIn { username } => {
            println!("* Logged in as {username}. Type /help for commands.")
        }
        ClientEvent::Notice { from, text } => println!("[{from}] {text}"),
        ClientEvent::ConversationStarted { peer } => {
            println!("* Conversation with {peer} started, exchanging keys...")
        }
        ClientEvent::SecureChannel { peer, fingerprint } => {
            println!("* Secure channel with {peer} ready. Key fingerprint: {fingerprint}")
        }
        ClientEvent::ChatReceived { from, text } => println!("<{from}> {text}"),
        ClientEvent::ConversationEnded { text } => println!("* {text}"),
        ClientEvent::DecryptFailed { reason } => {
            println!("* A message could not be decrypted: {reason}")
        }
    }
}
