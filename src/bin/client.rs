//! Terminal chat client.
//!
//! Usage: `client [host] [port] [nickname]`. Lines typed on stdin are sent
//! as chat messages; `/stats` requests server statistics and `/quit` leaves
//! without triggering reconnection.

use anyhow::Result;
use relaychat_server::client::{ChatClient, ClientEvent, ClientInput, ConnectionState};
use relaychat_server::ws::message::ServerMessage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(9090);
    let nickname = args.next().unwrap_or_else(|| "Anonymous".to_string());

    let (client, input, mut events) = ChatClient::new(host, port, nickname);
    let session = tokio::spawn(client.run());

    let input_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            let command = match line.as_str() {
                "" => continue,
                "/quit" => ClientInput::Quit,
                "/stats" => ClientInput::GetStats,
                _ => ClientInput::Say(line),
            };
            let quitting = matches!(command, ClientInput::Quit);
            if input.send(command).is_err() || quitting {
                break;
            }
        }
    });

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::State(state) => match state {
                ConnectionState::Connecting => println!("* connecting..."),
                ConnectionState::Connected => println!("* connected"),
                ConnectionState::Reconnecting { attempt, delay } => {
                    println!("* connection lost, retry {attempt} in {delay:?}")
                }
                ConnectionState::Closed => println!("* session closed"),
            },
            ClientEvent::Message(msg) => print_message(msg),
        }
    }

    input_task.abort();
    session.await??;
    Ok(())
}

fn print_message(msg: ServerMessage) {
    match msg {
        ServerMessage::System {
            message,
            timestamp,
            online_count,
        } => println!("[{timestamp}] * {message} ({online_count} online)"),
        ServerMessage::Message {
            nickname,
            message,
            timestamp,
        } => println!("[{timestamp}] <{nickname}> {message}"),
        ServerMessage::Userlist { users, count } => {
            let names: Vec<_> = users.into_iter().map(|u| u.nickname).collect();
            println!("* online ({count}): {}", names.join(", "));
        }
        ServerMessage::History { messages } => {
            for m in messages {
                println!("[{}] <{}> {}", m.time, m.nickname, m.message);
            }
        }
        ServerMessage::Stats { data } => println!(
            "* stats: {} users, {} messages ({} today), {} sessions",
            data.total_users, data.total_messages, data.today_messages, data.total_sessions
        ),
    }
}
