//! Four-instance client harness. The aggregator joins every instance before
//! it reads the liveness table.

use std::{
    net::SocketAddr,
    path::Path,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    process::Command,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    gate::{DirectoryGate, StartupGate},
    input::SharedInput,
    liveness::{DirectoryTable, LivenessTable, SlotId, SlotState},
    session::{SessionConfig, SessionOutcome, run_session},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    /// Created, never connects.
    Dormant,
    /// Runs first and releases the gate when done.
    Releaser,
    /// Waits for the gate, then runs.
    Waiter,
}

impl InstanceRole {
    pub fn for_slot(slot: SlotId) -> Self {
        match slot.get() {
            3 => InstanceRole::Releaser,
            4 => InstanceRole::Waiter,
            _ => InstanceRole::Dormant,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub server: SocketAddr,
    pub input_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceOutcome {
    Dormant,
    Session(SessionOutcome),
    /// The session hit an I/O error; the slot was still marked finished.
    SessionFailed,
}

/// `Err` covers setup failures; session failures come back as
/// [`InstanceOutcome::SessionFailed`].
pub async fn run_instance<T, G, O>(
    slot: SlotId,
    table: &T,
    gate: &G,
    input: &SharedInput,
    console: &mut O,
    settings: &InstanceSettings,
) -> Result<InstanceOutcome>
where
    T: LivenessTable,
    G: StartupGate,
    O: AsyncWrite + Unpin + Send,
{
    match InstanceRole::for_slot(slot) {
        InstanceRole::Dormant => {
            say(
                console,
                &format!("Client process {slot} created, but didn't connect to the server.\n"),
            )
            .await?;
            Ok(InstanceOutcome::Dormant)
        }
        InstanceRole::Releaser => {
            let outcome = connect_and_run(slot, table, input, console, settings).await?;
            gate.release()
                .with_context(|| format!("client {slot} failed to release the startup gate"))?;
            Ok(outcome)
        }
        InstanceRole::Waiter => {
            gate.acquire()
                .await
                .with_context(|| format!("client {slot} could not pass the startup gate"))?;
            say(
                console,
                &format!("Client process {slot} waited for the third client to finish.\n"),
            )
            .await?;
            connect_and_run(slot, table, input, console, settings).await
        }
    }
}

async fn connect_and_run<T, O>(
    slot: SlotId,
    table: &T,
    input: &SharedInput,
    console: &mut O,
    settings: &InstanceSettings,
) -> Result<InstanceOutcome>
where
    T: LivenessTable,
    O: AsyncWrite + Unpin + Send,
{
    let mut stream = TcpStream::connect(settings.server)
        .await
        .with_context(|| format!("client {slot} failed to connect to {}", settings.server))?;
    say(
        console,
        &format!("Client process {slot} connected to the server.\n"),
    )
    .await?;

    table.transition(slot, SlotState::Active)?;
    debug!(%slot, "slot active");

    let config = SessionConfig::new(slot.get()).with_input_timeout(settings.input_timeout);
    let result = {
        let mut input = input.lock().await;
        run_session(&mut stream, &mut input, console, &config).await
    };
    let outcome = match result {
        Ok(outcome) => InstanceOutcome::Session(outcome),
        Err(error) => {
            warn!(%slot, ?error, "session ended with error");
            InstanceOutcome::SessionFailed
        }
    };

    table.transition(slot, SlotState::Finished)?;
    debug!(%slot, ?outcome, "slot finished");

    if let Err(error) = stream.shutdown().await {
        debug!(%slot, ?error, "failed to shutdown client socket cleanly");
    }
    say(console, &format!("Client process {slot} terminated.\n")).await?;

    Ok(outcome)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    /// Final slot states, read after every instance was joined.
    pub states: Vec<(SlotId, SlotState)>,
    /// Instances that failed, with the reason.
    pub failures: Vec<(SlotId, String)>,
}

impl HarnessReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs the four instances as Tokio tasks sharing `table`, `gate`, and `input`.
///
/// `console` is called once per instance to obtain where it writes.
pub async fn run_tasks<T, G, O, F>(
    table: Arc<T>,
    gate: Arc<G>,
    input: SharedInput,
    settings: InstanceSettings,
    console: F,
) -> Result<HarnessReport>
where
    T: LivenessTable + 'static,
    G: StartupGate + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
    F: Fn() -> O,
{
    let instances: Vec<(SlotId, JoinHandle<Result<InstanceOutcome>>)> = SlotId::all()
        .map(|slot| {
            let table = Arc::clone(&table);
            let gate = Arc::clone(&gate);
            let input = Arc::clone(&input);
            let settings = settings.clone();
            let mut out = console();
            let handle = tokio::spawn(async move {
                run_instance(slot, &*table, &*gate, &input, &mut out, &settings).await
            });
            (slot, handle)
        })
        .collect();

    let mut failures = Vec::new();
    for (slot, handle) in instances {
        let result = match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(anyhow!(join_error)),
        };
        match result {
            Ok(outcome) => debug!(%slot, ?outcome, "client instance joined"),
            Err(error) => record_failure(slot, error, &*gate, &mut failures)?,
        }
    }

    let states = table.snapshot().context("failed to read liveness table")?;
    Ok(HarnessReport { states, failures })
}

/// Runs each instance as a child process of `executable`, sharing state
/// through a fresh run directory that is removed afterwards.
pub async fn run_processes(executable: &Path, settings: &InstanceSettings) -> Result<HarnessReport> {
    let run_dir = std::env::temp_dir().join(format!("number-classifier-{}", nanoid::nanoid!()));
    let table = DirectoryTable::create(&run_dir)
        .with_context(|| format!("failed to create liveness table in {}", run_dir.display()))?;
    let gate = DirectoryGate::new(&run_dir);
    info!(dir = %run_dir.display(), "created shared state");

    let report = supervise_processes(executable, settings, &table, &gate, &run_dir).await;

    if let Err(error) = std::fs::remove_dir_all(&run_dir) {
        warn!(dir = %run_dir.display(), ?error, "failed to remove shared state");
    }
    report
}

async fn supervise_processes(
    executable: &Path,
    settings: &InstanceSettings,
    table: &DirectoryTable,
    gate: &DirectoryGate,
    run_dir: &Path,
) -> Result<HarnessReport> {
    let mut children = Vec::new();
    for slot in SlotId::all() {
        let child = Command::new(executable)
            .arg("instance")
            .arg("--slot")
            .arg(slot.to_string())
            .arg("--state-dir")
            .arg(run_dir)
            .arg("--server")
            .arg(settings.server.to_string())
            .arg("--input-timeout-ms")
            .arg(settings.input_timeout.as_millis().to_string())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn client instance {slot}"))?;
        children.push((slot, child));
    }

    let mut failures = Vec::new();
    for (slot, mut child) in children {
        let status = child
            .wait()
            .await
            .with_context(|| format!("failed to wait for client instance {slot}"))?;
        if status.success() {
            debug!(%slot, "client instance exited");
        } else {
            record_failure(slot, anyhow!("exited with {status}"), gate, &mut failures)?;
        }
    }

    let states = table.snapshot().context("failed to read liveness table")?;
    Ok(HarnessReport { states, failures })
}

fn record_failure<G>(
    slot: SlotId,
    error: anyhow::Error,
    gate: &G,
    failures: &mut Vec<(SlotId, String)>,
) -> Result<()>
where
    G: StartupGate,
{
    warn!(%slot, error = ?error, "client instance failed");
    if InstanceRole::for_slot(slot) == InstanceRole::Releaser {
        gate.abandon().context("failed to abandon startup gate")?;
    }
    failures.push((slot, format!("{error:#}")));
    Ok(())
}

/// Writes the final state report.
pub async fn write_report<O>(console: &mut O, report: &HarnessReport) -> std::io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    let mut text = String::from("Final states of clients:\n");
    for (slot, state) in &report.states {
        text.push_str(&format!("Client {slot} state: {state}\n"));
    }
    for (slot, reason) in &report.failures {
        text.push_str(&format!("Client {slot} failed: {reason}\n"));
    }
    text.push_str("All client processes terminated.\n");
    say(console, &text).await
}

async fn say<O>(console: &mut O, text: &str) -> std::io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    console.write_all(text.as_bytes()).await?;
    console.flush().await
}
