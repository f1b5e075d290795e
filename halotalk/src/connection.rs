use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::{select, sync::watch};
use tracing::{debug, info, warn};

use crate::{
    hub::{Hub, Subscription},
    message::{ClientEvent, ServerEvent},
    session::Session,
};

/// Drives one WebSocket from upgrade to disconnect.
///
/// The connection is subscribed before its first frame is read, so it sees
/// its own join announcement. Whatever ends the loop (client close, a failed
/// write, server shutdown) the session is closed exactly once afterwards.
pub async fn run(
    socket: WebSocket,
    hub: Arc<Hub>,
    mut shutdown: watch::Receiver<bool>,
    peer: Option<SocketAddr>,
) {
    let mut subscription = hub.connect();
    let mut session = Session::new(subscription.id(), hub);
    info!(connection = session.id(), ?peer, "connection opened");

    if let Err(err) = run_session(socket, &mut session, &mut subscription, &mut shutdown).await {
        warn!(connection = session.id(), ?peer, error = ?err, "connection closed with error");
    }

    drop(subscription);
    session.close().await;
    info!(connection = session.id(), ?peer, "connection closed");
}

async fn run_session(
    socket: WebSocket,
    session: &mut Session,
    subscription: &mut Subscription,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (mut sink, mut stream) = socket.split();

    loop {
        select! {
            frame = stream.next() => {
                if !handle_frame(frame, session).await? {
                    return Ok(());
                }
            }
            event = subscription.recv() => {
                match event {
                    Some(event) => deliver(&mut sink, &event).await?,
                    None => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    if let Err(err) = sink.send(Message::Close(None)).await {
        debug!(connection = session.id(), ?err, "failed to send close frame");
    }
    Ok(())
}

async fn handle_frame(
    frame: Option<Result<Message, axum::Error>>,
    session: &mut Session,
) -> Result<bool> {
    let message = match frame {
        Some(message) => message.context("failed to read frame")?,
        None => return Ok(false),
    };

    match message {
        Message::Text(text) => {
            match ClientEvent::decode(&text) {
                Ok(event) => session.handle(event).await,
                Err(error) => {
                    debug!(connection = session.id(), %error, "dropping undecodable frame");
                }
            }
            Ok(true)
        }
        Message::Binary(data) => {
            debug!(connection = session.id(), len = data.len(), "ignoring binary frame");
            Ok(true)
        }
        Message::Ping(_) | Message::Pong(_) => Ok(true),
        Message::Close(_) => Ok(false),
    }
}

async fn deliver<S>(sink: &mut S, event: &ServerEvent) -> Result<()>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let text = event.encode().context("failed to encode event")?;
    sink.send(Message::Text(text))
        .await
        .with_context(|| format!("failed to deliver `{}`", event.name()))
}
