//! The persistent tool registry.
//!
//! The registry is the single source of truth for [`ToolRecord`]s. Usage
//! tracking and deletion never keep private copies; they go through
//! [`RegistryStore::update`], which re-reads the current record, applies a
//! change and writes it back as one step.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use toolshed_core::{ToolName, ToolRecord};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::file::{read_json, write_json_atomic, StoreLock};

/// File name of the registry inside the data directory.
pub const REGISTRY_FILE: &str = "tools.json";

// ============================================================================
// Store Trait
// ============================================================================

/// Access to the persistent tool registry.
pub trait RegistryStore: Send + Sync {
    /// Returns every record, in file order.
    fn read_all(&self) -> StoreResult<Vec<ToolRecord>>;

    /// Inserts `record`, replacing any record with the same name.
    fn upsert(&self, record: ToolRecord) -> StoreResult<()>;

    /// Removes the record named `name`.
    ///
    /// Returns [`StoreError::NotFound`] if there is no such record.
    fn remove(&self, name: &ToolName) -> StoreResult<ToolRecord>;

    /// Read-modify-write of one record.
    ///
    /// Implementations hold their write lock across the read and the write,
    /// so two concurrent updates both take effect.
    fn update(
        &self,
        name: &ToolName,
        apply: &mut dyn FnMut(&mut ToolRecord),
    ) -> StoreResult<ToolRecord>;

    /// Returns the record named `name`, if any.
    fn get(&self, name: &ToolName) -> StoreResult<Option<ToolRecord>> {
        Ok(self.read_all()?.into_iter().find(|r| &r.name == name))
    }

    /// Clears `total_runtime` and `last_used` for one tool, or for every
    /// tool when `name` is `None`. Returns the number of records reset.
    fn reset_usage(&self, name: Option<&ToolName>) -> StoreResult<usize> {
        let targets: Vec<ToolName> = match name {
            Some(name) => vec![name.clone()],
            None => self.read_all()?.into_iter().map(|r| r.name).collect(),
        };
        for target in &targets {
            self.update(target, &mut |record| record.reset_usage())?;
        }
        info!(count = targets.len(), "usage statistics reset");
        Ok(targets.len())
    }
}

// ============================================================================
// JSON File Registry
// ============================================================================

/// Registry backed by a JSON array in `tools.json`.
///
/// A missing file reads as an empty registry. Every write takes an
/// exclusive `fs2` lock on `tools.json.lock` and replaces the file
/// atomically.
#[derive(Debug, Clone)]
pub struct JsonRegistry {
    path: PathBuf,
}

impl JsonRegistry {
    /// Opens the registry at an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Opens `tools.json` inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(REGISTRY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<Vec<ToolRecord>> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    /// Runs `mutate` on the full record list under the lock and persists the
    /// result.
    fn modify<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<ToolRecord>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let _lock = StoreLock::acquire(&self.path)?;
        let mut records = self.load()?;
        let out = mutate(&mut records)?;
        write_json_atomic(&self.path, &records)?;
        Ok(out)
    }
}

impl RegistryStore for JsonRegistry {
    fn read_all(&self) -> StoreResult<Vec<ToolRecord>> {
        self.load()
    }

    fn upsert(&self, record: ToolRecord) -> StoreResult<()> {
        debug!(tool = %record.name, "registry upsert");
        self.modify(|records| {
            upsert_into(records, record);
            Ok(())
        })
    }

    fn remove(&self, name: &ToolName) -> StoreResult<ToolRecord> {
        debug!(tool = %name, "registry remove");
        self.modify(|records| remove_from(records, name))
    }

    fn update(
        &self,
        name: &ToolName,
        apply: &mut dyn FnMut(&mut ToolRecord),
    ) -> StoreResult<ToolRecord> {
        self.modify(|records| update_in(records, name, apply))
    }
}

// ============================================================================
// In-Memory Registry
// ============================================================================

/// Registry held in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: Mutex<Vec<ToolRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = ToolRecord>) -> Self {
        let registry = Self::new();
        {
            let mut guard = registry.lock();
            for record in records {
                upsert_into(&mut guard, record);
            }
        }
        registry
    }

    /// Makes every subsequent write fail with an I/O error, simulating a
    /// persistence failure.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ToolRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::io(
                "<memory>",
                std::io::Error::new(std::io::ErrorKind::Other, "registry is read-only"),
            ));
        }
        Ok(())
    }
}

impl RegistryStore for MemoryRegistry {
    fn read_all(&self) -> StoreResult<Vec<ToolRecord>> {
        Ok(self.lock().clone())
    }

    fn upsert(&self, record: ToolRecord) -> StoreResult<()> {
        self.check_writable()?;
        upsert_into(&mut self.lock(), record);
        Ok(())
    }

    fn remove(&self, name: &ToolName) -> StoreResult<ToolRecord> {
        self.check_writable()?;
        remove_from(&mut self.lock(), name)
    }

    fn update(
        &self,
        name: &ToolName,
        apply: &mut dyn FnMut(&mut ToolRecord),
    ) -> StoreResult<ToolRecord> {
        self.check_writable()?;
        update_in(&mut self.lock(), name, apply)
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

fn upsert_into(records: &mut Vec<ToolRecord>, record: ToolRecord) {
    match records.iter_mut().find(|r| r.name == record.name) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

fn remove_from(records: &mut Vec<ToolRecord>, name: &ToolName) -> StoreResult<ToolRecord> {
    let index = records
        .iter()
        .position(|r| &r.name == name)
        .ok_or_else(|| StoreError::NotFound(name.clone()))?;
    Ok(records.remove(index))
}

fn update_in(
    records: &mut [ToolRecord],
    name: &ToolName,
    apply: &mut dyn FnMut(&mut ToolRecord),
) -> StoreResult<ToolRecord> {
    let record = records
        .iter_mut()
        .find(|r| &r.name == name)
        .ok_or_else(|| StoreError::NotFound(name.clone()))?;
    apply(record);
    Ok(record.clone())
}
