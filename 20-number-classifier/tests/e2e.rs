use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn harness_end_to_end_over_processes() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("number_classifier");

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let addr = read_server_addr(&mut server_stdout).await?;

    // Drain additional server logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    let mut harness = spawn_harness(&binary, &addr).await?;

    // Instance 3 owns the operator first; it sends one number and declines.
    harness.send_line("4").await.context("send first number")?;
    harness.send_line("n").await.context("decline to continue")?;
    let third = read_until(&mut harness.stdout, "Client process 3 terminated.").await?;
    assert!(third.contains("Client process 1 created, but didn't connect to the server."));
    assert!(third.contains("Client process 2 created, but didn't connect to the server."));
    assert!(third.contains("Client process 3 connected to the server."));
    assert!(third.contains("The number 4 is even."));
    assert!(third.contains("The number 4 is not divisible by 3."));
    assert!(third.contains("This is the first number sent by this client."));

    // Only now does instance 4 get past the gate and start reading.
    harness.send_line("9").await.context("send second number")?;
    harness.send_line("n").await.context("decline to continue")?;
    let fourth = read_until(&mut harness.stdout, "All client processes terminated.").await?;
    assert!(fourth.contains("Client process 4 waited for the third client to finish."));
    assert!(fourth.contains("The number 9 is odd."));
    assert!(fourth.contains("The number 9 is divisible by 3."));
    assert!(fourth.contains("This is the first number sent by this client."));

    let report = fourth
        .lines()
        .skip_while(|line| *line != "Final states of clients:")
        .collect::<Vec<_>>();
    assert_eq!(
        report,
        vec![
            "Final states of clients:",
            "Client 1 state: idle",
            "Client 2 state: idle",
            "Client 3 state: finished",
            "Client 4 state: finished",
            "All client processes terminated.",
        ]
    );

    ensure_success(&mut harness.child, "harness").await?;

    // The server outlives its clients; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

struct HarnessProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl HarnessProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .env("RUST_LOG_STYLE", "never")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("server did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("server banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn spawn_harness(binary: &Path, addr: &str) -> Result<HarnessProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("harness")
        .arg("--server")
        .arg(addr)
        .arg("--input-timeout-secs")
        .arg("10")
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn harness")?;
    let stdin = child
        .stdin
        .take()
        .context("harness stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("harness stdout missing after spawn")?;

    Ok(HarnessProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

/// Collects output lines up to and including the first one containing `needle`.
async fn read_until(reader: &mut BufReader<ChildStdout>, needle: &str) -> Result<String> {
    let mut seen = String::new();
    loop {
        match read_line(reader).await {
            Ok(Some(line)) => {
                seen.push_str(&line);
                seen.push('\n');
                if line.contains(needle) {
                    return Ok(seen);
                }
            }
            Ok(None) => return Err(anyhow!("stream closed before '{needle}'; saw:\n{seen}")),
            Err(err) => return Err(err.context(format!("waiting for '{needle}'; saw:\n{seen}"))),
        }
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
