use std::net::SocketAddr;

use crate::cli::ServerArgs;

pub const DEFAULT_PORT: u16 = 31000;

/// Runtime settings shared by the listener and every session.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub workers: usize,
    pub max_frame_bytes: usize,
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            workers: 20,
            max_frame_bytes: 4096,
            outbox_capacity: 128,
        }
    }
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            listen: args.listen,
            workers: args.workers.get(),
            max_frame_bytes: args.max_frame_bytes.get(),
            outbox_capacity: args.outbox_capacity.get(),
        }
    }
}
