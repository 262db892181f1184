use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use chat_relay::{
    cli::{Cli, Command, ServeArgs},
    client,
    config::HubConfig,
    hub::Hub,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = HubConfig::from(&args);
    let hub = match &args.data_dir {
        Some(dir) => Hub::open(config, dir)
            .with_context(|| format!("failed to open data directory {}", dir.display()))?,
        None => Hub::in_memory(config),
    };

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server = Server::new(listener, Arc::new(hub));
    let addr = server.local_addr()?;
    info!("relay listening on {}", addr);

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
