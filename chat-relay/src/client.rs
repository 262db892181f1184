use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::warn;

use crate::{
    cli::ClientArgs,
    protocol::{ClientRequest, ServerMessage, Status, read_message, write_message},
};

/// What one line typed at the terminal asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(ClientRequest),
    Complain(String),
    Quit,
    Ignore,
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    write_stdout(&format!("*** connected to {}", args.server)).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut reader, &mut writer, &mut stdin, &mut input).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn run_client_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    let mut username: Option<String> = None;

    loop {
        input.clear();
        select! {
            server_message = read_message::<_, ServerMessage>(reader) => {
                if !handle_server_message(server_message, &mut username).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, username.as_deref(), writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(
    message: io::Result<Option<ServerMessage>>,
    username: &mut Option<String>,
) -> Result<bool> {
    match message? {
        Some(message) => {
            if let ServerMessage::LoginResponse {
                status: Status::Success,
                username: Some(name),
                ..
            } = &message
            {
                *username = Some(name.clone());
            }
            render_server_message(message).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    username: Option<&str>,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    match parse_input(input, username) {
        Input::Send(request) => write_message(writer, &request).await?,
        Input::Complain(problem) => write_stderr(&format!("!!! {problem}")).await?,
        Input::Quit => {
            write_stdout("*** leaving chat").await?;
            return Ok(false);
        }
        Input::Ignore => {}
    }
    Ok(true)
}

/// Interprets one terminal line. Slash commands map to requests; anything
/// else is chat and needs a logged-in username to send as.
pub fn parse_input(line: &str, username: Option<&str>) -> Input {
    let text = line.trim_end();
    if text.trim().is_empty() {
        return Input::Ignore;
    }

    let Some(command) = text.strip_prefix('/') else {
        return match username {
            Some(sender) => Input::Send(ClientRequest::SendMessage {
                sender: sender.to_string(),
                message: text.to_string(),
            }),
            None => Input::Complain("log in before sending messages".to_string()),
        };
    };

    let words: Vec<&str> = command.split_whitespace().collect();
    match words.as_slice() {
        ["quit"] => Input::Quit,
        ["register", username, password] => Input::Send(ClientRequest::Register {
            username: username.to_string(),
            password: password.to_string(),
        }),
        ["login", username, password] => Input::Send(ClientRequest::Login {
            username: username.to_string(),
            password: password.to_string(),
        }),
        ["history"] => Input::Send(ClientRequest::GetHistory { limit: None }),
        ["history", limit] => match limit.parse() {
            Ok(limit) => Input::Send(ClientRequest::GetHistory { limit: Some(limit) }),
            Err(_) => Input::Complain(format!("'{limit}' is not a number")),
        },
        _ => Input::Complain(
            "commands: /register <user> <pass>, /login <user> <pass>, /history [n], /quit".to_string(),
        ),
    }
}

/// Formats a server message for the terminal. Errors go to stderr.
pub fn render(message: &ServerMessage) -> Rendered {
    match message {
        ServerMessage::RegisterResponse {
            status: Status::Success,
            message,
        } => Rendered::Out(vec![format!("*** registered: {message}")]),
        ServerMessage::RegisterResponse { message, .. } => {
            Rendered::Err(format!("!!! registration failed: {message}"))
        }
        ServerMessage::LoginResponse {
            status: Status::Success,
            user_id,
            username,
            ..
        } => Rendered::Out(vec![format!(
            "*** logged in as {} (id {})",
            username.as_deref().unwrap_or("?"),
            user_id.unwrap_or_default()
        )]),
        ServerMessage::LoginResponse { message, .. } => Rendered::Err(format!(
            "!!! login failed: {}",
            message.as_deref().unwrap_or("unknown error")
        )),
        ServerMessage::HistoryResponse { messages } if messages.is_empty() => {
            Rendered::Out(vec!["*** no history yet".to_string()])
        }
        ServerMessage::HistoryResponse { messages } => Rendered::Out(
            messages
                .iter()
                .map(|entry| {
                    format!(
                        "[{}] <{}> {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.sender,
                        entry.message
                    )
                })
                .collect(),
        ),
        ServerMessage::NewMessage {
            sender, message, ..
        } => Rendered::Out(vec![format!("<{sender}> {message}")]),
        ServerMessage::Error { message } => Rendered::Err(format!("!!! {message}")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Out(Vec<String>),
    Err(String),
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn render_server_message(message: ServerMessage) -> io::Result<()> {
    match render(&message) {
        Rendered::Out(lines) => {
            for line in lines {
                write_stdout(&line).await?;
            }
            Ok(())
        }
        Rendered::Err(line) => write_stderr(&line).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::protocol::HistoryEntry;

    #[test]
    fn chat_requires_a_username() {
        assert!(matches!(parse_input("hello\n", None), Input::Complain(_)));
        assert_eq!(
            parse_input("hello there\n", Some("alice")),
            Input::Send(ClientRequest::SendMessage {
                sender: "alice".into(),
                message: "hello there".into()
            })
        );
    }

    #[test]
    fn slash_commands_map_to_requests() {
        assert_eq!(parse_input("/quit\n", None), Input::Quit);
        assert_eq!(parse_input("   \n", None), Input::Ignore);
        assert_eq!(
            parse_input("/login alice pw\n", None),
            Input::Send(ClientRequest::Login {
                username: "alice".into(),
                password: "pw".into()
            })
        );
        assert_eq!(
            parse_input("/history 5", None),
            Input::Send(ClientRequest::GetHistory { limit: Some(5) })
        );
        assert!(matches!(parse_input("/history lots", None), Input::Complain(_)));
        assert!(matches!(parse_input("/dance", None), Input::Complain(_)));
    }

    #[test]
    fn renders_history_and_errors() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let history = ServerMessage::HistoryResponse {
            messages: vec![HistoryEntry {
                sender: "bob".into(),
                message: "hey".into(),
                timestamp,
            }],
        };

        assert_eq!(
            render(&history),
            Rendered::Out(vec!["[2024-05-01 12:30:00] <bob> hey".to_string()])
        );
        assert_eq!(
            render(&ServerMessage::error("nope")),
            Rendered::Err("!!! nope".to_string())
        );
        assert_eq!(
            render(&ServerMessage::login_success(2, "bob")),
            Rendered::Out(vec!["*** logged in as bob (id 2)".to_string()])
        );
    }
}
