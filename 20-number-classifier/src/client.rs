use anyhow::{Context, Result};
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    input::OperatorInput,
    session::{SessionConfig, SessionOutcome, run_session},
};

/// Runs a single operator session outside the harness: no liveness slot and
/// no startup gate.
pub async fn run(args: ClientArgs) -> Result<SessionOutcome> {
    let mut stream = establish_connection(&args).await?;
    let mut input = OperatorInput::stdin();
    let mut stdout = tokio::io::stdout();
    let config = SessionConfig::new(args.id).with_input_timeout(args.input_timeout());

    let outcome = run_session(&mut stream, &mut input, &mut stdout, &config).await?;
    info!(?outcome, "session ended");
    shutdown_connection(&mut stream).await;

    Ok(outcome)
}

async fn establish_connection(args: &ClientArgs) -> Result<TcpStream> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);
    Ok(stream)
}

async fn shutdown_connection(stream: &mut TcpStream) {
    if let Err(error) = stream.shutdown().await {
        warn!(?error, "failed to shutdown client socket cleanly");
    }
}
