//! One operator-driven client session over a connected stream.
//!
//! ```text
//! AwaitNumberInput -> SendNumber -> AwaitResponseBurst -> AwaitContinueInput
//!        ^                                                        |
//!        +----------------------- 'y' / 'Y' ----------------------+
//!                                  otherwise -> Disconnecting
//! ```

use std::{io, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::Instant,
};
use tracing::debug;

use crate::{
    input::{InputEvent, OperatorInput},
    protocol::{TERMINATOR, contains_burst_marker, write_number},
};

pub const DEFAULT_INPUT_TIMEOUT: Duration = Duration::from_secs(20);

// Stand-in deadline for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

const RECV_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Instance number shown in prompts.
    pub id: u8,
    pub input_timeout: Duration,
}

impl SessionConfig {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            input_timeout: DEFAULT_INPUT_TIMEOUT,
        }
    }

    pub fn with_input_timeout(mut self, input_timeout: Duration) -> Self {
        self.input_timeout = input_timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The operator declined to continue and the terminator was sent.
    Declined,
    /// The operator typed the terminator value itself.
    TerminatorEntered,
    /// An input deadline passed; nothing further was sent.
    TimedOut,
    /// Operator input reached EOF; nothing further was sent.
    InputClosed,
    /// The server closed the connection before completing a burst.
    ServerClosed,
}

impl SessionOutcome {
    pub fn sent_terminator(self) -> bool {
        matches!(
            self,
            SessionOutcome::Declined | SessionOutcome::TerminatorEntered
        )
    }
}

enum Wait<T> {
    Got(T),
    TimedOut,
    Closed,
}

enum Burst {
    Complete,
    ServerClosed,
}

/// Runs one session over `stream`, leaving it open for the caller to close.
pub async fn run_session<S, O>(
    stream: &mut S,
    input: &mut OperatorInput,
    console: &mut O,
    config: &SessionConfig,
) -> io::Result<SessionOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    loop {
        let number = match await_number(input, console, config).await? {
            Wait::Got(number) => number,
            Wait::TimedOut => return give_up(console, config, SessionOutcome::TimedOut).await,
            Wait::Closed => return give_up(console, config, SessionOutcome::InputClosed).await,
        };

        write_number(stream, number).await?;
        if number == TERMINATOR {
            debug!(id = config.id, "operator entered the terminator");
            return Ok(SessionOutcome::TerminatorEntered);
        }

        say(console, "\n").await?;
        if let Burst::ServerClosed = receive_burst(stream, console).await? {
            say(console, "\n*** server closed the connection\n").await?;
            return Ok(SessionOutcome::ServerClosed);
        }

        let choice = match await_choice(input, console, config).await? {
            Wait::Got(choice) => choice,
            Wait::TimedOut => return give_up(console, config, SessionOutcome::TimedOut).await,
            Wait::Closed => return give_up(console, config, SessionOutcome::InputClosed).await,
        };

        if !choice.eq_ignore_ascii_case(&'y') {
            write_number(stream, TERMINATOR).await?;
            return Ok(SessionOutcome::Declined);
        }
    }
}

async fn await_number<O>(
    input: &mut OperatorInput,
    console: &mut O,
    config: &SessionConfig,
) -> io::Result<Wait<i32>>
where
    O: AsyncWrite + Unpin,
{
    loop {
        say(
            console,
            &format!(
                "Client {}: Enter a number ({} to respond): ",
                config.id,
                describe_timeout(config.input_timeout)
            ),
        )
        .await?;

        let deadline = deadline_after(config.input_timeout);
        let text = match next_non_blank(input, deadline).await {
            Wait::Got(text) => text,
            Wait::TimedOut => return Ok(Wait::TimedOut),
            Wait::Closed => return Ok(Wait::Closed),
        };

        match text.parse::<i32>() {
            Ok(number) => return Ok(Wait::Got(number)),
            Err(_) => {
                say(
                    console,
                    &format!("Client {}: '{text}' is not a whole number.\n", config.id),
                )
                .await?;
            }
        }
    }
}

async fn await_choice<O>(
    input: &mut OperatorInput,
    console: &mut O,
    config: &SessionConfig,
) -> io::Result<Wait<char>>
where
    O: AsyncWrite + Unpin,
{
    say(console, "Do you want to send another number? (y/n): ").await?;

    let deadline = deadline_after(config.input_timeout);
    Ok(match next_non_blank(input, deadline).await {
        Wait::Got(text) => match text.chars().next() {
            Some(choice) => Wait::Got(choice),
            None => Wait::Closed,
        },
        Wait::TimedOut => Wait::TimedOut,
        Wait::Closed => Wait::Closed,
    })
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

fn describe_timeout(timeout: Duration) -> String {
    if timeout < Duration::from_secs(1) {
        format!("{} milliseconds", timeout.as_millis())
    } else {
        format!("{} seconds", timeout.as_secs())
    }
}

async fn next_non_blank(input: &mut OperatorInput, deadline: Instant) -> Wait<String> {
    loop {
        match input.next_line(deadline).await {
            InputEvent::Line(line) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    return Wait::Got(trimmed.to_string());
                }
            }
            InputEvent::TimedOut => return Wait::TimedOut,
            InputEvent::Closed => return Wait::Closed,
        }
    }
}

/// Echoes server output until the accumulated text contains a burst marker.
async fn receive_burst<S, O>(stream: &mut S, console: &mut O) -> io::Result<Burst>
where
    S: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RECV_BUFFER];
    let mut received = String::new();

    loop {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            return Ok(Burst::ServerClosed);
        }

        console.write_all(&buf[..read]).await?;
        console.flush().await?;

        received.push_str(&String::from_utf8_lossy(&buf[..read]));
        if contains_burst_marker(&received) {
            return Ok(Burst::Complete);
        }
    }
}

async fn give_up<O>(
    console: &mut O,
    config: &SessionConfig,
    outcome: SessionOutcome,
) -> io::Result<SessionOutcome>
where
    O: AsyncWrite + Unpin,
{
    say(
        console,
        &format!(
            "\nClient {}: Timeout occurred or no input provided. Disconnecting...\n",
            config.id
        ),
    )
    .await?;
    Ok(outcome)
}

async fn say<O>(console: &mut O, text: &str) -> io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    console.write_all(text.as_bytes()).await?;
    console.flush().await
}
