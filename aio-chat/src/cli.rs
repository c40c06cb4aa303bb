use std::{net::SocketAddr, num::NonZeroUsize};

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a server and participate in the chat.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:31000")]
    pub listen: SocketAddr,

    /// Number of runtime worker threads serving connections.
    #[arg(long, default_value = "20")]
    pub workers: NonZeroUsize,

    /// Largest frame, in bytes, a client may send before it is disconnected.
    #[arg(long, default_value = "4096")]
    pub max_frame_bytes: NonZeroUsize,

    /// Lines queued per client before further messages to it are dropped.
    #[arg(long, default_value = "128")]
    pub outbox_capacity: NonZeroUsize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name to log in with.
    #[arg(long)]
    pub name: String,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:31000")]
    pub server: SocketAddr,
}
