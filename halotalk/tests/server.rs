use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use axum::{body::Body, http::Request, http::StatusCode};
use futures_util::{SinkExt, StreamExt};
use halotalk::{
    cli::ServerConfig,
    hub::{ANONYMOUS, Hub},
    message::{ChatRequest, ClientEvent, Presence, ServerEvent},
    server::Server,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tower::ServiceExt;

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    hub: Arc<Hub>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl TestServer {
    async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let server = Server::new(listener, test_config());
        let addr = server.local_addr()?;
        let hub = server.hub();

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Ok(Self {
            addr,
            hub,
            shutdown,
            task,
        })
    }

    async fn connect(&self) -> Result<Client> {
        let url = format!("ws://{}/ws", self.addr);
        let (client, _response) = connect_async(url.as_str()).await?;
        Ok(client)
    }

    async fn join(&self, name: &str) -> Result<Client> {
        let mut client = self.connect().await?;
        send(&mut client, &ClientEvent::Join(name.into())).await?;
        Ok(client)
    }

    async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        timeout(READ_TIMEOUT, self.task)
            .await
            .context("server did not shut down")???;
        Ok(())
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        public_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("public"),
        ..ServerConfig::default()
    }
}

async fn send(client: &mut Client, event: &ClientEvent) -> Result<()> {
    client.send(Message::Text(event.encode()?)).await?;
    Ok(())
}

async fn recv(client: &mut Client) -> Result<ServerEvent> {
    loop {
        let frame = timeout(READ_TIMEOUT, client.next())
            .await
            .context("timed out waiting for event")?
            .ok_or_else(|| anyhow!("connection closed"))??;
        if let Message::Text(text) = frame {
            return Ok(ServerEvent::decode(&text)?);
        }
    }
}

async fn assert_quiet(client: &mut Client) {
    if let Ok(frame) = timeout(QUIET_PERIOD, client.next()).await {
        panic!("expected no event, got {frame:?}");
    }
}

fn joined(username: &str, total_users: usize) -> ServerEvent {
    ServerEvent::UserJoined(Presence {
        username: username.into(),
        total_users,
    })
}

fn left(username: &str, total_users: usize) -> ServerEvent {
    ServerEvent::UserLeft(Presence {
        username: username.into(),
        total_users,
    })
}

fn chat(message: &str) -> ClientEvent {
    ClientEvent::ChatMessage(ChatRequest {
        message: message.into(),
    })
}

async fn wait_for_present(hub: &Hub, expected: usize) -> Result<()> {
    timeout(READ_TIMEOUT, async {
        while hub.present().await != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .with_context(|| format!("presence never reached {expected}"))
}

#[tokio::test]
async fn joins_announce_running_totals() -> Result<()> {
    let server = TestServer::start().await?;

    let mut alice = server.join("Alice").await?;
    assert_eq!(recv(&mut alice).await?, joined("Alice", 1));

    let mut bob = server.join("Bob").await?;
    assert_eq!(recv(&mut bob).await?, joined("Bob", 2));
    assert_eq!(recv(&mut alice).await?, joined("Bob", 2));

    let mut carol = server.join("Carol").await?;
    assert_eq!(recv(&mut carol).await?, joined("Carol", 3));
    assert_eq!(recv(&mut alice).await?, joined("Carol", 3));
    assert_eq!(recv(&mut bob).await?, joined("Carol", 3));

    send(&mut alice, &chat("hi")).await?;
    for client in [&mut alice, &mut bob, &mut carol] {
        match recv(client).await? {
            ServerEvent::ChatMessage(line) => {
                assert_eq!(line.username, "Alice");
                assert_eq!(line.message, "hi");
                chrono::DateTime::parse_from_rfc3339(&line.timestamp)?;
            }
            other => panic!("expected chat message, got {other:?}"),
        }
    }

    server.stop().await
}

#[tokio::test]
async fn typing_is_not_echoed_to_sender() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = server.join("Alice").await?;
    recv(&mut alice).await?;
    let mut bob = server.join("Bob").await?;
    recv(&mut bob).await?;
    recv(&mut alice).await?;

    send(&mut alice, &ClientEvent::Typing).await?;
    send(&mut alice, &ClientEvent::StopTyping).await?;
    send(&mut alice, &chat("done typing")).await?;

    assert_eq!(recv(&mut bob).await?, ServerEvent::Typing(Some("Alice".into())));
    assert_eq!(recv(&mut bob).await?, ServerEvent::StopTyping);
    // The chat line is the first thing Alice sees after her own typing events.
    assert!(matches!(recv(&mut alice).await?, ServerEvent::ChatMessage(_)));
    assert!(matches!(recv(&mut bob).await?, ServerEvent::ChatMessage(_)));

    server.stop().await
}

#[tokio::test]
async fn unjoined_connection_chats_as_anonymous_and_leaves_silently() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = server.join("Alice").await?;
    recv(&mut alice).await?;

    let mut lurker = server.connect().await?;
    send(&mut lurker, &chat("who's here?")).await?;
    match recv(&mut alice).await? {
        ServerEvent::ChatMessage(line) => assert_eq!(line.username, ANONYMOUS),
        other => panic!("expected chat message, got {other:?}"),
    }
    assert!(matches!(recv(&mut lurker).await?, ServerEvent::ChatMessage(_)));

    lurker.close(None).await?;
    assert_quiet(&mut alice).await;
    assert_eq!(server.hub.present().await, 1);

    server.stop().await
}

#[tokio::test]
async fn disconnect_announces_departure_once() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = server.join("Alice").await?;
    recv(&mut alice).await?;
    let mut bob = server.join("Bob").await?;
    recv(&mut bob).await?;
    recv(&mut alice).await?;

    bob.close(None).await?;
    drop(bob);

    assert_eq!(recv(&mut alice).await?, left("Bob", 1));
    assert_quiet(&mut alice).await;
    wait_for_present(&server.hub, 1).await?;

    server.stop().await
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_closing() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = server.connect().await?;

    alice.send(Message::Text("not json".into())).await?;
    alice
        .send(Message::Text(r#"{"event":"shout","data":"hey"}"#.into()))
        .await?;
    alice
        .send(Message::Text(r#"{"event":"join","data":{"name":"Alice"}}"#.into()))
        .await?;

    assert_eq!(recv(&mut alice).await?, joined("", 1));

    server.stop().await
}

#[tokio::test]
async fn shutdown_closes_open_connections() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = server.join("Alice").await?;
    recv(&mut alice).await?;
    let hub = Arc::clone(&server.hub);

    server.stop().await?;

    let closed = timeout(READ_TIMEOUT, async {
        loop {
            match alice.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "client was not closed on shutdown");
    wait_for_present(&hub, 0).await
}

#[tokio::test]
async fn serves_entry_page_and_rejects_plain_ws_requests() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server = Server::new(listener, test_config());

    let response = server
        .router()
        .oneshot(Request::builder().uri("/").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert!(String::from_utf8_lossy(&body).contains("<title>HaloTalk</title>"));

    let response = server
        .router()
        .oneshot(Request::builder().uri("/ws").body(Body::empty())?)
        .await?;
    assert!(response.status().is_client_error());

    let response = server
        .router()
        .oneshot(Request::builder().uri("/missing.css").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}
