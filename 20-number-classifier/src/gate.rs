//! One-shot startup gate between instance 3 and instance 4.

use std::{
    fs,
    future::Future,
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum GateError {
    #[error("startup gate was already released")]
    AlreadyReleased,

    #[error("startup gate was already acquired")]
    AlreadyAcquired,

    #[error("startup gate was abandoned before it was released")]
    Abandoned,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub trait StartupGate: Send + Sync {
    fn release(&self) -> Result<(), GateError>;

    /// No-op once released.
    fn abandon(&self) -> Result<(), GateError>;

    fn acquire(&self) -> impl Future<Output = Result<(), GateError>> + Send;
}

#[derive(Debug)]
pub struct SemaphoreGate {
    permits: Semaphore,
    released: AtomicBool,
    acquired: AtomicBool,
}

impl SemaphoreGate {
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
            released: AtomicBool::new(false),
            acquired: AtomicBool::new(false),
        }
    }
}

impl Default for SemaphoreGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupGate for SemaphoreGate {
    fn release(&self) -> Result<(), GateError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Err(GateError::AlreadyReleased);
        }
        if self.permits.is_closed() {
            return Err(GateError::Abandoned);
        }
        self.permits.add_permits(1);
        info!("startup gate released");
        Ok(())
    }

    fn abandon(&self) -> Result<(), GateError> {
        if !self.released.load(Ordering::Acquire) {
            self.permits.close();
            info!("startup gate abandoned");
        }
        Ok(())
    }

    fn acquire(&self) -> impl Future<Output = Result<(), GateError>> + Send {
        async move {
            if self.acquired.swap(true, Ordering::AcqRel) {
                return Err(GateError::AlreadyAcquired);
            }
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| GateError::Abandoned)?;
            permit.forget();
            info!("startup gate acquired");
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum GateMark {
    Released,
    Abandoned,
}

/// Marker file in the run directory; waiters poll for it.
#[derive(Debug)]
pub struct DirectoryGate {
    dir: PathBuf,
    poll_interval: Duration,
    acquired: AtomicBool,
}

impl DirectoryGate {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            acquired: AtomicBool::new(false),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn marker_path(&self) -> PathBuf {
        self.dir.join("gate.json")
    }

    fn settle(&self, mark: GateMark) -> Result<(), GateError> {
        let staging = self.dir.join(format!(".gate.{}.tmp", std::process::id()));
        let encoded = serde_json::to_vec(&mark).map_err(io::Error::from)?;
        fs::write(&staging, encoded)?;

        // Linking fails if the marker exists, so only one settle wins.
        let linked = fs::hard_link(&staging, self.marker_path());
        let _ = fs::remove_file(&staging);

        match linked {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                match read_mark(&self.marker_path())? {
                    Some(GateMark::Abandoned) => Err(GateError::Abandoned),
                    _ => Err(GateError::AlreadyReleased),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl StartupGate for DirectoryGate {
    fn release(&self) -> Result<(), GateError> {
        self.settle(GateMark::Released)?;
        info!(dir = %self.dir.display(), "startup gate released");
        Ok(())
    }

    fn abandon(&self) -> Result<(), GateError> {
        match self.settle(GateMark::Abandoned) {
            Ok(()) => {
                info!(dir = %self.dir.display(), "startup gate abandoned");
                Ok(())
            }
            Err(GateError::AlreadyReleased | GateError::Abandoned) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn acquire(&self) -> impl Future<Output = Result<(), GateError>> + Send {
        async move {
            if self.acquired.swap(true, Ordering::AcqRel) {
                return Err(GateError::AlreadyAcquired);
            }

            let marker = self.marker_path();
            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                ticker.tick().await;
                match read_mark(&marker)? {
                    Some(GateMark::Released) => {
                        info!(dir = %self.dir.display(), "startup gate acquired");
                        return Ok(());
                    }
                    Some(GateMark::Abandoned) => return Err(GateError::Abandoned),
                    None => debug!("startup gate still closed"),
                }
            }
        }
    }
}

fn read_mark(path: &Path) -> Result<Option<GateMark>, GateError> {
    match fs::read(path) {
        Ok(raw) => serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| GateError::Io(err.into())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
