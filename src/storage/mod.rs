//! Persistence layer.
//!
//! Position records are key-value entries (market id → position) kept in a
//! namespace per capital mode. A dry-run store and a live store never read
//! or write each other's records: the file name carries the namespace, the
//! file body repeats it, and every record carries its own mode tag, all of
//! which are checked on load and on write.

pub mod journal;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::types::{EngineError, Mode, Position};

/// Mode-scoped key-value position storage.
pub trait PositionStore: Send + Sync {
    /// The only mode this store accepts.
    fn mode(&self) -> Mode;

    /// All stored positions.
    fn load_all(&self) -> Result<Vec<Position>>;

    /// Insert or replace the record for `position.market_id`.
    fn put(&self, position: &Position) -> Result<()>;

    /// Delete the record for `market_id` (no-op if absent).
    fn remove(&self, market_id: &str) -> Result<()>;
}

fn check_mode(store: Mode, position: &Position) -> Result<(), EngineError> {
    if position.mode != store {
        return Err(EngineError::ModeMismatch {
            expected: store,
            found: position.mode,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    namespace: String,
    positions: BTreeMap<String, Position>,
}

/// One JSON file per namespace: `<dir>/positions-<namespace>.json`.
#[derive(Debug)]
pub struct JsonPositionStore {
    mode: Mode,
    path: PathBuf,
    // serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonPositionStore {
    pub fn new(dir: impl AsRef<Path>, mode: Mode) -> Self {
        let path = dir
            .as_ref()
            .join(format!("positions-{}.json", mode.namespace()));
        Self {
            mode,
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, Position>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read positions from {}", self.path.display()))?;
        let file: StoreFile = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse positions from {}", self.path.display()))?;

        if file.namespace != self.mode.namespace() {
            return Err(EngineError::Storage(format!(
                "{} belongs to namespace '{}', expected '{}'",
                self.path.display(),
                file.namespace,
                self.mode.namespace()
            ))
            .into());
        }
        for position in file.positions.values() {
            check_mode(self.mode, position)?;
        }
        Ok(file.positions)
    }

    fn write(&self, positions: BTreeMap<String, Position>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let file = StoreFile {
            namespace: self.mode.namespace().to_string(),
            positions,
        };
        let json = serde_json::to_string_pretty(&file).context("Failed to serialise positions")?;

        // write-then-rename so a crash never leaves a torn file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl PositionStore for JsonPositionStore {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn load_all(&self) -> Result<Vec<Position>> {
        let positions = self.read()?;
        info!(
            path = %self.path.display(),
            count = positions.len(),
            namespace = self.mode.namespace(),
            "Positions loaded"
        );
        Ok(positions.into_values().collect())
    }

    fn put(&self, position: &Position) -> Result<()> {
        check_mode(self.mode, position)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut positions = self.read()?;
        positions.insert(position.market_id.clone(), position.clone());
        self.write(positions)?;
        debug!(market_id = %position.market_id, namespace = self.mode.namespace(), "Position saved");
        Ok(())
    }

    fn remove(&self, market_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut positions = self.read()?;
        if positions.remove(market_id).is_some() {
            self.write(positions)?;
            debug!(market_id, namespace = self.mode.namespace(), "Position deleted");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Volatile store for tests and for runs with persistence disabled.
#[derive(Debug)]
pub struct MemoryPositionStore {
    mode: Mode,
    positions: Mutex<BTreeMap<String, Position>>,
    fail_writes: Mutex<bool>,
}

impl MemoryPositionStore {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            positions: Mutex::new(BTreeMap::new()),
            fail_writes: Mutex::new(false),
        }
    }

    /// Make subsequent writes fail (storage outage).
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    fn failing(&self) -> bool {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PositionStore for MemoryPositionStore {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn load_all(&self) -> Result<Vec<Position>> {
        let positions = self.positions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(positions.values().cloned().collect())
    }

    fn put(&self, position: &Position) -> Result<()> {
        check_mode(self.mode, position)?;
        if self.failing() {
            return Err(EngineError::Storage("write refused".into()).into());
        }
        self.positions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(position.market_id.clone(), position.clone());
        Ok(())
    }

    fn remove(&self, market_id: &str) -> Result<()> {
        if self.failing() {
            return Err(EngineError::Storage("write refused".into()).into());
        }
        self.positions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(market_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
