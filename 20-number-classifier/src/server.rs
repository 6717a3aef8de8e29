use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    classify::classify,
    protocol::{ProtocolError, TERMINATOR, read_number},
};

pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self { listener }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result);
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

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr) {
    debug!(%peer, "connection accepted");
    tokio::spawn(async move {
        match serve_connection(stream).await {
            Ok(summary) => debug!(%peer, ?summary, "connection closed"),
            Err(err) => warn!(%peer, error = ?err, "client connection closed with error"),
        }
    });
}

/// Why a connection stopped being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent the terminator.
    Terminated,
    /// The client closed its side without sending the terminator.
    PeerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub classified: u64,
    pub reason: CloseReason,
}

/// Serves one connection until the peer sends the terminator or goes away.
///
/// The `is_first` flag lives here and nowhere else, so concurrent connections
/// never observe each other's progress.
pub async fn serve_connection<S>(mut stream: S) -> Result<ConnectionSummary, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut is_first = true;
    let mut classified = 0;

    let reason = loop {
        let number = match read_number(&mut stream).await? {
            Some(number) => number,
            None => break CloseReason::PeerClosed,
        };

        if number == TERMINATOR {
            info!("client requested to terminate the connection");
            break CloseReason::Terminated;
        }

        let (classification, next_is_first) = classify(number, is_first);
        is_first = next_is_first;

        for line in classification.lines() {
            stream.write_all(line.as_bytes()).await?;
        }
        stream.flush().await?;
        classified += 1;
    };

    if let Err(err) = stream.shutdown().await {
        debug!(?err, "failed to shutdown connection cleanly");
    }

    Ok(ConnectionSummary { classified, reason })
}
