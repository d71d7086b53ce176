use crate::layout::{Collection, StoreLayout};
use crate::locks::FileLock;
use crate::records::RecordStore;
use crate::unit::{OpKind, Record, RowKey, Staging, UnitOfWork};
use crate::wal::{BeforeImage, WriteAheadLog};
use crate::{StateStore, StoreError};
use siren_schema::{
    validate_key, Ambulance, Incident, IncidentId, InventoryItem, ItemKey, UnitId,
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Durable store rooted at a directory.
///
/// Records are checksummed JSON files replaced atomically. A unit of work
/// holds a shared lock on the store lock file plus one exclusive `flock` per
/// row, taken in [`RowKey`] order. Commit writes before-images to the
/// [`WriteAheadLog`] first, so a crash mid-commit is rolled back on the next
/// open (or by the next unit that locks an affected row).
pub struct FileStore {
    layout: StoreLayout,
    incidents: RecordStore<Incident>,
    ambulances: RecordStore<Ambulance>,
    items: RecordStore<InventoryItem>,
    wal: WriteAheadLog,
}

impl FileStore {
    /// Open (creating if needed) the store at `root` and roll back any
    /// interrupted commit when no other handle is active.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root.as_ref());
        layout.initialize()?;
        Self::attach(layout)
    }

    /// Like [`open`](Self::open), but a directory that holds no store is
    /// [`StoreError::Unavailable`] instead of being created.
    pub fn open_existing(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root.as_ref());
        layout.check_format()?;
        Self::attach(layout)
    }

    fn attach(layout: StoreLayout) -> Result<Self, StoreError> {
        let wal = WriteAheadLog::new(&layout);
        wal.initialize()?;

        let store = Self {
            incidents: RecordStore::new(layout.clone(), Collection::Incidents),
            ambulances: RecordStore::new(layout.clone(), Collection::Ambulances),
            items: RecordStore::new(layout.clone(), Collection::Inventory),
            layout,
            wal,
        };

        if let Some(_lock) = FileLock::try_exclusive(&store.layout.lock_file())? {
            let recovered = store.wal.recover()?;
            if recovered > 0 {
                info!("rolled back {recovered} interrupted commit(s) on open");
            }
        } else {
            debug!("store busy, WAL recovery deferred to the lock holders");
        }
        Ok(store)
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn wal(&self) -> &WriteAheadLog {
        &self.wal
    }

    pub fn incident_records(&self) -> &RecordStore<Incident> {
        &self.incidents
    }

    pub fn ambulance_records(&self) -> &RecordStore<Ambulance> {
        &self.ambulances
    }

    pub fn item_records(&self) -> &RecordStore<InventoryItem> {
        &self.items
    }

    /// Roll back every interrupted commit, waiting for active units to finish.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let _lock = FileLock::exclusive(&self.layout.lock_file())?;
        self.wal.recover()
    }

    fn read_record(&self, row: &RowKey) -> Result<Option<Record>, StoreError> {
        Ok(match row {
            RowKey::Incident(id) => self.incidents.get(id)?.map(Record::Incident),
            RowKey::Ambulance(id) => self.ambulances.get(id)?.map(Record::Ambulance),
            RowKey::Item(key) => self.items.get(key)?.map(Record::Item),
        })
    }

    fn read_raw(&self, row: &RowKey) -> Result<Option<String>, StoreError> {
        match row {
            RowKey::Incident(id) => self.incidents.raw(id),
            RowKey::Ambulance(id) => self.ambulances.raw(id),
            RowKey::Item(key) => self.items.raw(key),
        }
    }

    fn write_record(&self, record: &Record) -> Result<(), StoreError> {
        match record {
            Record::Incident(incident) => self.incidents.put(&incident.id, incident),
            Record::Ambulance(ambulance) => self.ambulances.put(&ambulance.id, ambulance),
            Record::Item(item) => self.items.put(&item.key, item),
        }
    }

    fn apply(&self, op: OpKind, writes: &BTreeMap<RowKey, Record>) -> Result<(), StoreError> {
        let mut steps = Vec::with_capacity(writes.len());
        for row in writes.keys() {
            let path = self.layout.record_path(row);
            steps.push(match self.read_raw(row)? {
                Some(content) => BeforeImage::Present { path, content },
                None => BeforeImage::Absent(path),
            });
        }
        let entry = self.wal.begin(op, writes.keys().cloned().collect(), steps)?;

        for (row, record) in writes {
            if let Err(e) = self.write_record(record) {
                warn!("{op}: write of {row} failed, rolling back: {e}");
                if let Err(rollback_err) = self.wal.rollback(&entry) {
                    warn!("{op}: rollback deferred to recovery: {rollback_err}");
                }
                return Err(e);
            }
        }

        self.wal.commit(&entry.op_id)
    }
}

impl StateStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    fn incident(&self, id: &IncidentId) -> Result<Option<Incident>, StoreError> {
        self.incidents.get(id)
    }

    fn incidents(&self) -> Result<Vec<Incident>, StoreError> {
        self.incidents.list()
    }

    fn ambulance(&self, id: &UnitId) -> Result<Option<Ambulance>, StoreError> {
        self.ambulances.get(id)
    }

    fn ambulances(&self) -> Result<Vec<Ambulance>, StoreError> {
        self.ambulances.list()
    }

    fn item(&self, key: &ItemKey) -> Result<Option<InventoryItem>, StoreError> {
        self.items.get(key)
    }

    fn items(&self) -> Result<Vec<InventoryItem>, StoreError> {
        self.items.list()
    }

    fn begin(&self, op: OpKind, rows: &[RowKey]) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        let mut sorted = rows.to_vec();
        sorted.sort();
        sorted.dedup();
        for row in &sorted {
            validate_key("record key", row.key())?;
        }

        loop {
            let store_lock = FileLock::shared(&self.layout.lock_file())?;
            let mut row_locks = Vec::with_capacity(sorted.len());
            for row in &sorted {
                row_locks.push(FileLock::exclusive(&self.layout.row_lock(row))?);
            }

            // Holding every row lock means no live commit can own an entry on these rows.
            let interrupted = self
                .wal
                .pending()?
                .iter()
                .any(|entry| sorted.iter().any(|row| entry.touches(row)));
            if !interrupted {
                let staging = Staging::new(op, &sorted);
                debug!("{op}: locked {}", staging.subject());
                return Ok(Box::new(FileUnit {
                    store: self,
                    staging,
                    _row_locks: row_locks,
                    _store_lock: store_lock,
                }));
            }

            drop(row_locks);
            drop(store_lock);
            warn!("{op}: interrupted commit found on locked rows, recovering");
            self.recover()?;
        }
    }
}

struct FileUnit<'a> {
    store: &'a FileStore,
    staging: Staging,
    // released in declaration order: rows first, then the store lock
    _row_locks: Vec<FileLock>,
    _store_lock: FileLock,
}

impl UnitOfWork for FileUnit<'_> {
    fn op(&self) -> OpKind {
        self.staging.op()
    }

    fn load(&self, row: &RowKey) -> Result<Option<Record>, StoreError> {
        self.staging.check(row)?;
        if let Some(record) = self.staging.staged(row) {
            return Ok(Some(record.clone()));
        }
        self.store.read_record(row)
    }

    fn stage(&mut self, record: Record) -> Result<(), StoreError> {
        self.staging.stage(record)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let FileUnit {
            store,
            staging,
            _row_locks,
            _store_lock,
        } = *self;
        if staging.is_empty() {
            return Ok(());
        }
        let op = staging.op();
        let writes = staging.into_writes();
        store.apply(op, &writes)?;
        debug!("{op}: committed {} record(s)", writes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siren_schema::Location;
    use std::fs;
    use std::sync::Arc;

    fn open() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn seed_item(store: &FileStore, key: &str, qty: u32) {
        let row = RowKey::Item(key.into());
        let mut unit = store.begin(OpKind::Provision, &[row]).unwrap();
        unit.put_item(InventoryItem::new(key.into(), key, qty, 0))
            .unwrap();
        unit.commit().unwrap();
    }

    #[test]
    fn commit_makes_writes_visible() {
        let (_dir, store) = open();
        let id: IncidentId = "I1".into();
        let mut unit = store
            .begin(OpKind::Create, &[RowKey::Incident(id.clone())])
            .unwrap();
        let incident = Incident::new(id.clone(), Location::new(1.0, 2.0), chrono::Utc::now());
        unit.put_incident(incident.clone()).unwrap();
        assert_eq!(unit.incident(&id).unwrap(), Some(incident.clone()));
        assert!(store.incident(&id).unwrap().is_none(), "staged write leaked");
        unit.commit().unwrap();

        assert_eq!(store.incident(&id).unwrap(), Some(incident));
        assert!(store.wal().pending().unwrap().is_empty());
    }

    #[test]
    fn dropped_unit_applies_nothing() {
        let (_dir, store) = open();
        {
            let mut unit = store
                .begin(OpKind::Provision, &[RowKey::Ambulance("AMB-01".into())])
                .unwrap();
            unit.put_ambulance(Ambulance::provisioned("AMB-01".into()))
                .unwrap();
        }
        assert!(store.ambulances().unwrap().is_empty());
    }

    #[test]
    fn put_outside_locked_rows_fails() {
        let (_dir, store) = open();
        let mut unit = store
            .begin(OpKind::Refuel, &[RowKey::Ambulance("AMB-01".into())])
            .unwrap();
        let err = unit
            .put_ambulance(Ambulance::provisioned("AMB-02".into()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Unlocked(_)));
        assert!(unit.ambulance(&"AMB-02".into()).is_err());
    }

    #[test]
    fn invalid_row_keys_rejected_before_locking() {
        let (_dir, store) = open();
        let err = store
            .begin(OpKind::Create, &[RowKey::Incident(IncidentId::new("../escape"))])
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn reopen_rolls_back_interrupted_commit() {
        let (dir, store) = open();
        seed_item(&store, "oxygen", 20);
        let row = RowKey::Item("oxygen".into());
        let path = store.layout().record_path(&row);
        let before = fs::read_to_string(&path).unwrap();

        // crash after the WAL entry and the record write, before WAL commit
        store
            .wal()
            .begin(
                OpKind::Restock,
                vec![row.clone()],
                vec![BeforeImage::Present {
                    path: path.clone(),
                    content: before.clone(),
                }],
            )
            .unwrap();
        store
            .item_records()
            .put("oxygen", &InventoryItem::new("oxygen".into(), "oxygen", 19, 0))
            .unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.item(&"oxygen".into()).unwrap().unwrap().qty, 20);
        assert!(reopened.wal().pending().unwrap().is_empty());
    }

    #[test]
    fn begin_recovers_interrupted_commit_on_its_rows() {
        let (_dir, store) = open();
        let row = RowKey::Incident("I7".into());
        let path = store.layout().record_path(&row);
        store
            .wal()
            .begin(
                OpKind::Create,
                vec![row.clone()],
                vec![BeforeImage::Absent(path.clone())],
            )
            .unwrap();
        store
            .incident_records()
            .put(
                "I7",
                &Incident::new("I7".into(), Location::default(), chrono::Utc::now()),
            )
            .unwrap();

        let unit = store.begin(OpKind::Create, &[row.clone()]).unwrap();
        assert!(unit.incident(&"I7".into()).unwrap().is_none());
        assert!(!path.exists());
        assert!(store.wal().pending().unwrap().is_empty());
    }

    #[test]
    fn concurrent_units_serialize_on_a_row() {
        let (_dir, store) = open();
        seed_item(&store, "bandages", 0);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        let key: ItemKey = "bandages".into();
                        let mut unit = store
                            .begin(OpKind::Adjust, &[RowKey::Item(key.clone())])
                            .unwrap();
                        let mut item = unit.item(&key).unwrap().unwrap();
                        item.qty += 1;
                        unit.put_item(item).unwrap();
                        unit.commit().unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.item(&"bandages".into()).unwrap().unwrap().qty, 40);
    }

    #[test]
    fn listing_returns_sorted_records() {
        let (_dir, store) = open();
        let rows = [
            RowKey::Ambulance("AMB-02".into()),
            RowKey::Ambulance("AMB-01".into()),
        ];
        let mut unit = store.begin(OpKind::Provision, &rows).unwrap();
        unit.put_ambulance(Ambulance::provisioned("AMB-02".into()))
            .unwrap();
        unit.put_ambulance(Ambulance::provisioned("AMB-01".into()))
            .unwrap();
        unit.commit().unwrap();

        let ids: Vec<String> = store
            .ambulances()
            .unwrap()
            .into_iter()
            .map(|a| a.id.to_string())
            .collect();
        assert_eq!(ids, vec!["AMB-01", "AMB-02"]);
    }

    #[test]
    fn open_existing_refuses_an_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("typo");
        assert!(matches!(
            FileStore::open_existing(&missing),
            Err(StoreError::Unavailable(_))
        ));
        assert!(!missing.exists());

        FileStore::open(&missing).unwrap();
        seed_item(&FileStore::open_existing(&missing).unwrap(), "oxygen", 3);
        let reopened = FileStore::open_existing(&missing).unwrap();
        assert_eq!(reopened.item(&"oxygen".into()).unwrap().unwrap().qty, 3);
    }
}
