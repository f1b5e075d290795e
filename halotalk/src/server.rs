use std::{future::Future, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{ConnectInfo, State, ws::WebSocketUpgrade},
    response::Response,
    routing::get,
};
use tokio::{net::TcpListener, sync::watch};
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::{cli::ServerConfig, connection, hub::Hub};

/// HTTP listener serving the static entry page and the `/ws` event channel.
pub struct Server {
    listener: TcpListener,
    hub: Arc<Hub>,
    public_dir: PathBuf,
    shutdown: watch::Sender<bool>,
}

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    shutdown: watch::Receiver<bool>,
}

impl Server {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            listener,
            hub: Arc::new(Hub::new(config.channel_capacity)),
            public_dir: config.public_dir,
            shutdown,
        }
    }

    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            shutdown: self.shutdown.subscribe(),
        };

        Router::new()
            .route("/ws", get(ws_upgrade))
            .fallback_service(ServeDir::new(&self.public_dir))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(state)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let Server {
            listener,
            shutdown: stop_connections,
            ..
        } = self;

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("server shutting down");
            // Upgraded sockets outlive the HTTP connection, so close them explicitly.
            stop_connections.send_replace(true);
        })
        .await
        .context("server terminated unexpectedly")
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn ws_upgrade(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| connection::run(socket, state.hub, state.shutdown, peer))
}
