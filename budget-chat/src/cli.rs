use std::net::{IpAddr, SocketAddr};

use clap::{Args, Parser, Subcommand};

use crate::room::DEFAULT_QUEUE_CAPACITY;

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
    /// Connect to a chat server from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind, as `host:port` or a bare host (port 8080). Use port 0
    /// for an ephemeral port.
    #[arg(long, env = "PROTO_ADDRESS", default_value = "0.0.0.0:8080", value_parser = parse_listen_addr)]
    pub listen: String,

    /// Undelivered lines a member may have queued before it is disconnected.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, value_parser = parse_capacity)]
    pub queue_capacity: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name to send as soon as the connection is up. Without it, the first
    /// line typed is used.
    #[arg(long)]
    pub name: Option<String>,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub server: SocketAddr,
}

/// Port used when the listen address names only a host.
pub const DEFAULT_PORT: u16 = 8080;

fn parse_listen_addr(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("listen address cannot be empty".to_string());
    }
    if raw.parse::<SocketAddr>().is_ok() {
        return Ok(raw.to_string());
    }
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT).to_string());
    }
    // Hostnames are resolved at bind time.
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(raw.to_string())
        }
        Some(_) => Err(format!("invalid listen address '{raw}'")),
        None => Ok(format!("{raw}:{DEFAULT_PORT}")),
    }
}

fn parse_capacity(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("queue capacity must be at least 1".to_string()),
        Ok(capacity) => Ok(capacity),
        Err(err) => Err(err.to_string()),
    }
}
