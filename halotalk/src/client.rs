use anyhow::{Context, Result};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{ChatRequest, ClientEvent, ServerEvent},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut sink, mut source) = establish_connection(&args).await?;
    write_stdout(&format!("*** connected as {}", args.nickname)).await?;
    send_event(&mut sink, &ClientEvent::Join(args.nickname.clone())).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut source, &mut sink, &mut stdin, &mut input).await?;
    shutdown_connection(&mut sink).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(WsSink, WsSource)> {
    let (stream, _response) = connect_async(args.server.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    Ok(stream.split())
}

async fn send_event(sink: &mut WsSink, event: &ClientEvent) -> Result<()> {
    let text = event.encode().context("failed to encode event")?;
    sink.send(Message::Text(text))
        .await
        .context("failed to send event")?;
    Ok(())
}

async fn run_client_loop(
    source: &mut WsSource,
    sink: &mut WsSink,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            frame = source.next() => {
                if !handle_server_frame(frame).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, sink).await? {
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

async fn handle_server_frame(
    frame: Option<Result<Message, tungstenite::Error>>,
) -> Result<bool> {
    match frame {
        Some(Ok(Message::Text(text))) => {
            match ServerEvent::decode(&text) {
                Ok(event) => render_server_event(event).await?,
                Err(error) => warn!(%error, "ignoring unreadable server event"),
            }
            Ok(true)
        }
        Some(Ok(Message::Close(_))) | None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
        Some(Ok(_)) => Ok(true),
        Some(Err(err)) => Err(err).context("failed to read from server"),
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    sink: &mut WsSink,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    send_event(
        sink,
        &ClientEvent::ChatMessage(ChatRequest {
            message: text.to_string(),
        }),
    )
    .await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(sink: &mut WsSink) {
    if let Err(error) = sink.close().await {
        warn!(?error, "failed to close websocket cleanly");
    }
}

async fn render_server_event(event: ServerEvent) -> io::Result<()> {
    match event {
        ServerEvent::UserJoined(presence) => {
            write_stdout(&format!(
                "*** {} joined the chat ({} online)",
                presence.username, presence.total_users
            ))
            .await
        }
        ServerEvent::UserLeft(presence) => {
            write_stdout(&format!(
                "*** {} left the chat ({} online)",
                presence.username, presence.total_users
            ))
            .await
        }
        ServerEvent::ChatMessage(line) => {
            write_stdout(&format!("<{}> {}", line.username, line.message)).await
        }
        ServerEvent::Typing(username) => {
            let who = username.as_deref().unwrap_or("someone");
            write_stdout(&format!("*** {who} is typing...")).await
        }
        ServerEvent::StopTyping => Ok(()),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
