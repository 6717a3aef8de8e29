use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use number_classifier::{
    cli::{Cli, Command, HarnessArgs, InstanceArgs, Isolation},
    client,
    gate::{DirectoryGate, SemaphoreGate},
    harness::{self, InstanceSettings},
    input::OperatorInput,
    liveness::{DirectoryTable, MemoryTable, SlotId},
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().context("failed to start the tokio runtime")?;
    let result = runtime.block_on(dispatch(cli));
    // A stdin read that is still blocked cannot be cancelled; do not wait on it.
    runtime.shutdown_background();
    result
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Server(args) => {
            let listener = TcpListener::bind(args.listen)
                .await
                .with_context(|| format!("failed to bind {}", args.listen))?;
            let server = Server::new(listener);
            let addr = server.local_addr()?;
            info!("server listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => {
            client::run(args).await?;
        }
        Command::Harness(args) => run_harness(args).await?,
        Command::Instance(args) => run_instance(args).await?,
    }

    Ok(())
}

async fn run_harness(args: HarnessArgs) -> Result<()> {
    let settings = InstanceSettings {
        server: args.server,
        input_timeout: args.input_timeout(),
    };

    let report = match args.isolation {
        Isolation::Processes => {
            let executable =
                std::env::current_exe().context("failed to locate the harness executable")?;
            harness::run_processes(&executable, &settings).await?
        }
        Isolation::Tasks => {
            harness::run_tasks(
                Arc::new(MemoryTable::new()),
                Arc::new(SemaphoreGate::new()),
                OperatorInput::stdin().shared(),
                settings,
                tokio::io::stdout,
            )
            .await?
        }
    };

    harness::write_report(&mut tokio::io::stdout(), &report).await?;
    if !report.is_clean() {
        bail!("{} client instance(s) failed", report.failures.len());
    }
    Ok(())
}

async fn run_instance(args: InstanceArgs) -> Result<()> {
    let slot = SlotId::new(args.slot)?;
    let table = DirectoryTable::open(&args.state_dir)?;
    let gate = DirectoryGate::new(&args.state_dir);
    let settings = InstanceSettings {
        server: args.server,
        input_timeout: args.input_timeout(),
    };

    harness::run_instance(
        slot,
        &table,
        &gate,
        &OperatorInput::stdin().shared(),
        &mut tokio::io::stdout(),
        &settings,
    )
    .await?;
    Ok(())
}
