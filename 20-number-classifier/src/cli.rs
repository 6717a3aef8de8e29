use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};

const MAX_INPUT_TIMEOUT_SECS: u64 = 86_400;
const MAX_INPUT_TIMEOUT_MS: u64 = MAX_INPUT_TIMEOUT_SECS * 1_000;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the classification server, accepting TCP connections.
    Server(ServerArgs),
    /// Run one interactive session against a server.
    Client(ClientArgs),
    /// Start the four client instances and report their final states.
    Harness(HarnessArgs),
    /// Run a single harness instance (spawned by `harness`).
    #[command(hide = true)]
    Instance(InstanceArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:7777")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:7777")]
    pub server: SocketAddr,

    /// Number shown in prompts.
    #[arg(long, default_value_t = 1)]
    pub id: u8,

    /// Seconds the operator has to answer each prompt.
    #[arg(
        long,
        default_value_t = 20,
        value_parser = clap::value_parser!(u64).range(1..=MAX_INPUT_TIMEOUT_SECS)
    )]
    pub input_timeout_secs: u64,
}

impl ClientArgs {
    pub fn input_timeout(&self) -> Duration {
        Duration::from_secs(self.input_timeout_secs)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// One OS process per instance.
    Processes,
    /// One Tokio task per instance, all in this process.
    Tasks,
}

#[derive(Args, Debug, Clone)]
pub struct HarnessArgs {
    /// Address of the server every instance connects to.
    #[arg(long, default_value = "127.0.0.1:7777")]
    pub server: SocketAddr,

    /// Seconds the operator has to answer each prompt.
    #[arg(
        long,
        default_value_t = 20,
        value_parser = clap::value_parser!(u64).range(1..=MAX_INPUT_TIMEOUT_SECS)
    )]
    pub input_timeout_secs: u64,

    /// How the four instances are isolated from each other.
    #[arg(long, value_enum, default_value_t = Isolation::Processes)]
    pub isolation: Isolation,
}

impl HarnessArgs {
    pub fn input_timeout(&self) -> Duration {
        Duration::from_secs(self.input_timeout_secs)
    }
}

#[derive(Args, Debug, Clone)]
pub struct InstanceArgs {
    /// Slot owned by this instance (1-4).
    #[arg(long)]
    pub slot: u8,

    /// Run directory holding the liveness table and the startup gate.
    #[arg(long)]
    pub state_dir: PathBuf,

    #[arg(long)]
    pub server: SocketAddr,

    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_INPUT_TIMEOUT_MS))]
    pub input_timeout_ms: u64,
}

impl InstanceArgs {
    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }
}
