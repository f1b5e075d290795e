use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};

use crate::hub::DEFAULT_CHANNEL_CAPACITY;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the chat page and the event channel on one port.
    Serve(ServeArgs),
    /// Connect to a server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Interface to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding index.html and the other static assets.
    #[arg(long, default_value = "public")]
    pub public_dir: PathBuf,

    /// Events buffered per subscriber before a slow connection starts skipping.
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name announced when joining.
    #[arg(long)]
    pub nickname: String,

    /// WebSocket URL of the server's event channel.
    #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
    pub server: String,
}

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub public_dir: PathBuf,
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            public_dir: PathBuf::from("public"),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen: SocketAddr::new(args.host, args.port),
            public_dir: args.public_dir,
            channel_capacity: args.channel_capacity,
        }
    }
}
