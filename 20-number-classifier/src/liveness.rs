//! Liveness table shared by the four client instances of one run. Readers
//! must join every writer before trusting a snapshot.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of client instances in a run.
pub const CLIENT_COUNT: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u8);

impl SlotId {
    pub fn new(id: u8) -> Result<Self, TableError> {
        if (1..=CLIENT_COUNT).contains(&id) {
            Ok(Self(id))
        } else {
            Err(TableError::SlotOutOfRange(id))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = SlotId> {
        (1..=CLIENT_COUNT).map(SlotId)
    }

    fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    #[default]
    Idle,
    Active,
    Finished,
}

impl SlotState {
    pub fn can_become(self, next: SlotState) -> bool {
        matches!(
            (self, next),
            (SlotState::Idle, SlotState::Active) | (SlotState::Active, SlotState::Finished)
        )
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotState::Idle => f.write_str("idle"),
            SlotState::Active => f.write_str("active"),
            SlotState::Finished => f.write_str("finished"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("slot {0} is outside 1..={max}", max = CLIENT_COUNT)]
    SlotOutOfRange(u8),

    #[error("slot {slot} cannot move from {from} to {to}")]
    InvalidTransition {
        slot: SlotId,
        from: SlotState,
        to: SlotState,
    },

    #[error("slot {slot} record is corrupt")]
    Corrupt {
        slot: SlotId,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub trait LivenessTable: Send + Sync {
    fn get(&self, slot: SlotId) -> Result<SlotState, TableError>;

    fn set(&self, slot: SlotId, state: SlotState) -> Result<(), TableError>;

    /// Only the owner of `slot` may call this.
    fn transition(&self, slot: SlotId, next: SlotState) -> Result<(), TableError> {
        let current = self.get(slot)?;
        if !current.can_become(next) {
            return Err(TableError::InvalidTransition {
                slot,
                from: current,
                to: next,
            });
        }
        self.set(slot, next)
    }

    fn snapshot(&self) -> Result<Vec<(SlotId, SlotState)>, TableError> {
        SlotId::all()
            .map(|slot| self.get(slot).map(|state| (slot, state)))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryTable {
    slots: Mutex<[SlotState; CLIENT_COUNT as usize]>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LivenessTable for MemoryTable {
    fn get(&self, slot: SlotId) -> Result<SlotState, TableError> {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(slots[slot.index()])
    }

    fn set(&self, slot: SlotId, state: SlotState) -> Result<(), TableError> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots[slot.index()] = state;
        Ok(())
    }
}

/// One JSON record per slot, replaced by rename.
#[derive(Debug, Clone)]
pub struct DirectoryTable {
    dir: PathBuf,
}

impl DirectoryTable {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, TableError> {
        let table = Self { dir: dir.into() };
        fs::create_dir_all(&table.dir)?;
        for slot in SlotId::all() {
            table.set(slot, SlotState::Idle)?;
        }
        Ok(table)
    }

    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TableError> {
        let table = Self { dir: dir.into() };
        if !table.dir.is_dir() {
            return Err(TableError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("state directory {} does not exist", table.dir.display()),
            )));
        }
        Ok(table)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, slot: SlotId) -> PathBuf {
        self.dir.join(format!("slot-{slot}.json"))
    }
}

impl LivenessTable for DirectoryTable {
    fn get(&self, slot: SlotId) -> Result<SlotState, TableError> {
        let raw = fs::read(self.record_path(slot))?;
        serde_json::from_slice(&raw).map_err(|source| TableError::Corrupt { slot, source })
    }

    fn set(&self, slot: SlotId, state: SlotState) -> Result<(), TableError> {
        let encoded =
            serde_json::to_vec(&state).map_err(|source| TableError::Corrupt { slot, source })?;
        let staging = self.dir.join(format!(".slot-{slot}.{}.tmp", std::process::id()));
        fs::write(&staging, encoded)?;
        fs::rename(&staging, self.record_path(slot))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("number-classifier-table-{}", nanoid::nanoid!()))
    }

    fn slot(id: u8) -> SlotId {
        SlotId::new(id).expect("valid slot")
    }

    #[test]
    fn slot_ids_are_bounded() {
        assert!(SlotId::new(0).is_err());
        assert!(SlotId::new(5).is_err());
        assert_eq!(SlotId::all().map(SlotId::get).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn transitions_only_move_forward() {
        assert!(SlotState::Idle.can_become(SlotState::Active));
        assert!(SlotState::Active.can_become(SlotState::Finished));
        assert!(!SlotState::Idle.can_become(SlotState::Finished));
        assert!(!SlotState::Finished.can_become(SlotState::Active));
        assert!(!SlotState::Active.can_become(SlotState::Active));
    }

    #[test]
    fn memory_table_starts_idle_and_tracks_each_slot() {
        let table = MemoryTable::new();
        table.transition(slot(3), SlotState::Active).expect("activate");
        table.transition(slot(3), SlotState::Finished).expect("finish");

        let snapshot = table.snapshot().expect("snapshot");
        assert_eq!(
            snapshot,
            vec![
                (slot(1), SlotState::Idle),
                (slot(2), SlotState::Idle),
                (slot(3), SlotState::Finished),
                (slot(4), SlotState::Idle),
            ]
        );
    }

    #[test]
    fn memory_table_rejects_repeated_transition() {
        let table = MemoryTable::new();
        table.transition(slot(4), SlotState::Active).expect("activate");
        table.transition(slot(4), SlotState::Finished).expect("finish");

        let err = table
            .transition(slot(4), SlotState::Finished)
            .expect_err("second finish");
        assert!(matches!(
            err,
            TableError::InvalidTransition {
                from: SlotState::Finished,
                to: SlotState::Finished,
                ..
            }
        ));
    }

    #[test]
    fn directory_table_is_visible_to_a_second_handle() {
        let dir = scratch_dir();
        let creator = DirectoryTable::create(&dir).expect("create");
        let other = DirectoryTable::open(&dir).expect("open");

        other.transition(slot(3), SlotState::Active).expect("activate");
        assert_eq!(creator.get(slot(3)).expect("read"), SlotState::Active);
        assert_eq!(creator.get(slot(1)).expect("read"), SlotState::Idle);

        fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn directory_table_reports_corrupt_records() {
        let dir = scratch_dir();
        let table = DirectoryTable::create(&dir).expect("create");
        fs::write(dir.join("slot-2.json"), b"sleeping").expect("corrupt");

        let err = table.get(slot(2)).expect_err("corrupt record");
        assert!(matches!(err, TableError::Corrupt { .. }));

        fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn opening_a_missing_directory_fails() {
        let err = DirectoryTable::open(scratch_dir()).expect_err("missing dir");
        assert!(matches!(err, TableError::Io(_)));
    }
}
