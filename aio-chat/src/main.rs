use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, runtime::Runtime};
use tracing::{info, warn};

use aio_chat::{
    cli::{Cli, Command},
    client,
    config::ServerConfig,
    listener::Listener,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn build_runtime(workers: Option<usize>) -> Result<Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = workers {
        builder.worker_threads(workers);
    }
    builder
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}; is the port already in use?", config.listen))?;
    let listener = Listener::new(listener, config);
    let addr = listener.local_addr()?;
    info!("server listening on {}", addr);

    if let Err(err) = listener.run_until_ctrl_c().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let config = ServerConfig::from(args);
            build_runtime(Some(config.workers))?.block_on(run_server(config))?;
        }
        Command::Client(args) => build_runtime(None)?.block_on(client::run(args))?,
    }

    Ok(())
}
