//! Operator input that can be abandoned on a deadline without losing data.
//!
//! `read_line` is not cancel-safe, so lines are read by a dedicated task, one
//! per request, and handed over an mpsc channel whose `recv` is.

use std::sync::Arc;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::{Instant, timeout_at},
};
use tracing::warn;

pub type SharedInput = Arc<Mutex<OperatorInput>>;

type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    TimedOut,
    Closed,
}

struct LineChannel {
    requests: mpsc::Sender<()>,
    lines: mpsc::Receiver<String>,
}

pub struct OperatorInput {
    source: Option<LineSource>,
    channel: Option<LineChannel>,
    reader: Option<JoinHandle<()>>,
    read_pending: bool,
}

impl OperatorInput {
    /// Wraps `source` without touching it; reading starts on the first wait.
    pub fn new<R>(source: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            source: Some(Box::new(source)),
            channel: None,
            reader: None,
            read_pending: false,
        }
    }

    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }

    pub fn shared(self) -> SharedInput {
        Arc::new(Mutex::new(self))
    }

    /// Waits for the next line, without its line ending, until `deadline`.
    pub async fn next_line(&mut self, deadline: Instant) -> InputEvent {
        self.start_reader();
        let Some(channel) = self.channel.as_mut() else {
            return InputEvent::Closed;
        };

        if !self.read_pending {
            if channel.requests.send(()).await.is_err() {
                return InputEvent::Closed;
            }
            self.read_pending = true;
        }

        match timeout_at(deadline, channel.lines.recv()).await {
            Ok(Some(line)) => {
                self.read_pending = false;
                InputEvent::Line(line)
            }
            Ok(None) => InputEvent::Closed,
            Err(_) => InputEvent::TimedOut,
        }
    }

    fn start_reader(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        let (requests, demand) = mpsc::channel(1);
        let (tx, lines) = mpsc::channel(1);
        self.reader = Some(tokio::spawn(pump_lines(source, demand, tx)));
        self.channel = Some(LineChannel { requests, lines });
    }
}

impl Drop for OperatorInput {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn pump_lines(
    mut source: LineSource,
    mut demand: mpsc::Receiver<()>,
    tx: mpsc::Sender<String>,
) {
    let mut raw = Vec::new();
    while demand.recv().await.is_some() {
        raw.clear();
        match source.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&raw);
                let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
                if tx.send(trimmed).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                warn!(?error, "failed to read operator input");
                break;
            }
        }
    }
}
