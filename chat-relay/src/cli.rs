use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay hub, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, env = "RELAY_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Number of messages returned by `get_history` when no limit is given.
    #[arg(long, env = "RELAY_HISTORY_LIMIT", default_value_t = 50)]
    pub history_limit: usize,

    /// Upper bound applied to client-supplied history limits.
    #[arg(long, env = "RELAY_MAX_HISTORY", default_value_t = 1000)]
    pub max_history: usize,

    /// Longest accepted request line, in bytes.
    #[arg(long, env = "RELAY_MAX_FRAME_BYTES", default_value_t = 64 * 1024)]
    pub max_frame_bytes: usize,

    /// Accept `send_message` from connections that have not logged in.
    #[arg(long, env = "RELAY_ALLOW_ANONYMOUS_SEND")]
    pub allow_anonymous_send: bool,

    /// Do not push recent history after a successful login.
    #[arg(long)]
    pub no_login_replay: bool,

    /// Give up on a write to a client after this many milliseconds.
    #[arg(long, env = "RELAY_WRITE_TIMEOUT_MS")]
    pub write_timeout_ms: Option<u64>,

    /// Directory for `users.json` and `messages.jsonl`. Data is kept in memory when omitted.
    #[arg(long, env = "RELAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub server: SocketAddr,
}
