use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use budget_chat::{
    cli::{Cli, Command},
    client,
    room::Room,
    server::ChatServer,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let listener = TcpListener::bind(args.listen.as_str()).await?;
            let room = Arc::new(Room::with_queue_capacity(args.queue_capacity));
            let server = ChatServer::with_room(listener, room);
            let addr = server.local_addr()?;
            info!("chat server listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("chat server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
