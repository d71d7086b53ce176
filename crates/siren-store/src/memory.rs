use crate::unit::{OpKind, Record, RowKey, Staging, UnitOfWork};
use crate::{StateStore, StoreError};
use siren_schema::{Ambulance, Incident, IncidentId, InventoryItem, ItemKey, UnitId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, Default)]
struct Tables {
    incidents: BTreeMap<IncidentId, Incident>,
    ambulances: BTreeMap<UnitId, Ambulance>,
    items: BTreeMap<ItemKey, InventoryItem>,
}

impl Tables {
    fn get(&self, row: &RowKey) -> Option<Record> {
        match row {
            RowKey::Incident(id) => self.incidents.get(id).cloned().map(Record::Incident),
            RowKey::Ambulance(id) => self.ambulances.get(id).cloned().map(Record::Ambulance),
            RowKey::Item(key) => self.items.get(key).cloned().map(Record::Item),
        }
    }

    fn put(&mut self, record: Record) {
        match record {
            Record::Incident(incident) => {
                self.incidents.insert(incident.id.clone(), incident);
            }
            Record::Ambulance(ambulance) => {
                self.ambulances.insert(ambulance.id.clone(), ambulance);
            }
            Record::Item(item) => {
                self.items.insert(item.key.clone(), item);
            }
        }
    }
}

/// Row locks for the in-memory backend. A unit takes all of its rows in one
/// step, so waiting never happens while holding a partial set.
#[derive(Debug, Default)]
struct RowLockTable {
    held: Mutex<BTreeSet<RowKey>>,
    released: Condvar,
}

impl RowLockTable {
    fn acquire(&self, rows: &[RowKey]) -> RowGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while rows.iter().any(|row| held.contains(row)) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.extend(rows.iter().cloned());
        RowGuard {
            table: self,
            rows: rows.to_vec(),
        }
    }
}

struct RowGuard<'a> {
    table: &'a RowLockTable,
    rows: Vec<RowKey>,
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for row in &self.rows {
            held.remove(row);
        }
        self.table.released.notify_all();
    }
}

/// Volatile store for tests, benchmarks and embedding.
///
/// [`set_commit_fault`](Self::set_commit_fault) makes every commit fail with
/// [`StoreError::Unavailable`] without applying anything.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    locks: RowLockTable,
    commit_fault: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_commit_fault(&self, enabled: bool) {
        self.commit_fault.store(enabled, Ordering::SeqCst);
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f(&tables)
    }
}

impl StateStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn incident(&self, id: &IncidentId) -> Result<Option<Incident>, StoreError> {
        Ok(self.read(|t| t.incidents.get(id).cloned()))
    }

    fn incidents(&self) -> Result<Vec<Incident>, StoreError> {
        Ok(self.read(|t| t.incidents.values().cloned().collect()))
    }

    fn ambulance(&self, id: &UnitId) -> Result<Option<Ambulance>, StoreError> {
        Ok(self.read(|t| t.ambulances.get(id).cloned()))
    }

    fn ambulances(&self) -> Result<Vec<Ambulance>, StoreError> {
        Ok(self.read(|t| t.ambulances.values().cloned().collect()))
    }

    fn item(&self, key: &ItemKey) -> Result<Option<InventoryItem>, StoreError> {
        Ok(self.read(|t| t.items.get(key).cloned()))
    }

    fn items(&self) -> Result<Vec<InventoryItem>, StoreError> {
        Ok(self.read(|t| t.items.values().cloned().collect()))
    }

    fn begin(&self, op: OpKind, rows: &[RowKey]) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        let mut sorted = rows.to_vec();
        sorted.sort();
        sorted.dedup();
        let guard = self.locks.acquire(&sorted);
        Ok(Box::new(MemoryUnit {
            store: self,
            staging: Staging::new(op, &sorted),
            _guard: guard,
        }))
    }
}

struct MemoryUnit<'a> {
    store: &'a MemoryStore,
    staging: Staging,
    _guard: RowGuard<'a>,
}

impl UnitOfWork for MemoryUnit<'_> {
    fn op(&self) -> OpKind {
        self.staging.op()
    }

    fn load(&self, row: &RowKey) -> Result<Option<Record>, StoreError> {
        self.staging.check(row)?;
        if let Some(record) = self.staging.staged(row) {
            return Ok(Some(record.clone()));
        }
        Ok(self.store.read(|t| t.get(row)))
    }

    fn stage(&mut self, record: Record) -> Result<(), StoreError> {
        self.staging.stage(record)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryUnit {
            store,
            staging,
            _guard,
        } = *self;
        if store.commit_fault.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "injected commit fault ({})",
                staging.op()
            )));
        }
        let op = staging.op();
        let writes = staging.into_writes();
        let count = writes.len();
        let mut tables = store
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for record in writes.into_values() {
            tables.put(record);
        }
        debug!("{op}: committed {count} record(s) in memory");
        Ok(())
    }
}
