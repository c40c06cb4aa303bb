use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::watch,
    task::{JoinError, JoinSet},
    time::timeout,
};
use tracing::{info, warn};

use crate::{config::ServerConfig, registry::Registry, router::Router, session};

pub const SHUTDOWN_NOTICE: &str = "*** server shutting down";

/// How long sessions get to flush their outboxes once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Listener {
    listener: TcpListener,
    router: Router,
    config: Arc<ServerConfig>,
}

impl Listener {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            router: Router::new(Arc::new(Registry::new())),
            config: Arc::new(config),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.router.registry())
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// On shutdown every logged-in client is sent [`SHUTDOWN_NOTICE`], then
    /// each session writes out what is queued for it and closes. Returns once
    /// all sessions are gone or the grace period runs out.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Listener {
            listener,
            router,
            config,
        } = self;
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &router, &config, &stop_rx, &mut sessions);
                }
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    handle_session_exit(finished);
                }
            }
        }

        drop(listener);
        handle_shutdown(&router);
        let _ = stop_tx.send(true);
        drain_sessions(&mut sessions).await;

        Ok(())
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

fn handle_shutdown(router: &Router) {
    info!(clients = router.registry().len(), "server shutting down");
    router.announce(SHUTDOWN_NOTICE);
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    router: &Router,
    config: &Arc<ServerConfig>,
    stop: &watch::Receiver<bool>,
    sessions: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => {
            let router = router.clone();
            let config = Arc::clone(config);
            let stop = stop.clone();
            sessions.spawn(async move {
                let (reader, writer) = stream.into_split();
                if let Err(err) = session::serve(reader, writer, peer, router, &config, stop).await {
                    warn!(peer = %peer, error = ?err, "client connection closed with error");
                }
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn handle_session_exit(finished: Result<(), JoinError>) {
    if let Err(err) = finished {
        warn!(error = ?err, "session task failed");
    }
}

async fn drain_sessions(sessions: &mut JoinSet<()>) {
    let drained = timeout(SHUTDOWN_GRACE, async {
        while let Some(finished) = sessions.join_next().await {
            handle_session_exit(finished);
        }
    })
    .await;

    if drained.is_err() {
        warn!(remaining = sessions.len(), "sessions still open after grace period; aborting");
        sessions.abort_all();
    }
}
