use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{room::Room, session::run_session};

/// Accepts TCP connections and runs a chat session for each of them against
/// one shared room.
pub struct ChatServer {
    listener: TcpListener,
    room: Arc<Room>,
}

impl ChatServer {
    pub fn new(listener: TcpListener) -> Self {
        Self::with_room(listener, Arc::new(Room::new()))
    }

    pub fn with_room(listener: TcpListener, room: Arc<Room>) -> Self {
        Self { listener, room }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// The listener is closed on return; sessions that are already running
    /// keep going until their clients disconnect.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ChatServer { listener, room } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("chat server no longer accepting connections");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &room);
                }
            }
        }

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

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, room: &Arc<Room>) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, room),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, room: &Arc<Room>) {
    let room = Arc::clone(room);
    tokio::spawn(async move {
        debug!(peer = %peer, "client connected");
        let (reader, writer) = stream.into_split();
        match run_session(room, reader, writer).await {
            Ok(()) => debug!(peer = %peer, "client disconnected"),
            Err(err) => warn!(peer = %peer, error = ?err, "client connection closed with error"),
        }
    });
}
