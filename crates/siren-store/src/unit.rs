use crate::StoreError;
use serde::{Deserialize, Serialize};
use siren_schema::{Ambulance, Incident, IncidentId, InventoryItem, ItemKey, UnitId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The kind of mutation a unit of work performs. Recorded in WAL entries and logs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OpKind {
    Provision,
    Create,
    Dispatch,
    Arrive,
    Transport,
    Close,
    Refuel,
    Repair,
    Restock,
    Adjust,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::Provision => "provision",
            OpKind::Create => "create",
            OpKind::Dispatch => "dispatch",
            OpKind::Arrive => "arrive",
            OpKind::Transport => "transport",
            OpKind::Close => "close",
            OpKind::Refuel => "refuel",
            OpKind::Repair => "repair",
            OpKind::Restock => "restock",
            OpKind::Adjust => "adjust",
        };
        f.write_str(s)
    }
}

/// Address of one persisted entity. The derived ordering is the global lock order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowKey {
    Incident(IncidentId),
    Ambulance(UnitId),
    Item(ItemKey),
}

impl RowKey {
    pub fn collection(&self) -> crate::Collection {
        match self {
            RowKey::Incident(_) => crate::Collection::Incidents,
            RowKey::Ambulance(_) => crate::Collection::Ambulances,
            RowKey::Item(_) => crate::Collection::Inventory,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            RowKey::Incident(id) => id.as_str(),
            RowKey::Ambulance(id) => id.as_str(),
            RowKey::Item(key) => key.as_str(),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection(), self.key())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Incident(Incident),
    Ambulance(Ambulance),
    Item(InventoryItem),
}

impl Record {
    pub fn row_key(&self) -> RowKey {
        match self {
            Record::Incident(i) => RowKey::Incident(i.id.clone()),
            Record::Ambulance(a) => RowKey::Ambulance(a.id.clone()),
            Record::Item(item) => RowKey::Item(item.key.clone()),
        }
    }
}

/// Write set and lock set of an open unit of work, shared by the backends.
#[derive(Debug)]
pub struct Staging {
    op: OpKind,
    rows: BTreeSet<RowKey>,
    writes: BTreeMap<RowKey, Record>,
}

impl Staging {
    pub fn new(op: OpKind, rows: &[RowKey]) -> Self {
        Self {
            op,
            rows: rows.iter().cloned().collect(),
            writes: BTreeMap::new(),
        }
    }

    pub fn op(&self) -> OpKind {
        self.op
    }

    pub fn rows(&self) -> &BTreeSet<RowKey> {
        &self.rows
    }

    pub fn check(&self, row: &RowKey) -> Result<(), StoreError> {
        if self.rows.contains(row) {
            Ok(())
        } else {
            Err(StoreError::Unlocked(row.to_string()))
        }
    }

    pub fn staged(&self, row: &RowKey) -> Option<&Record> {
        self.writes.get(row)
    }

    pub fn stage(&mut self, record: Record) -> Result<(), StoreError> {
        let row = record.row_key();
        self.check(&row)?;
        self.writes.insert(row, record);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Short description of the locked rows, for logs and WAL entries.
    pub fn subject(&self) -> String {
        self.rows
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn into_writes(self) -> BTreeMap<RowKey, Record> {
        self.writes
    }
}

/// A locked read-modify-write transaction over a fixed set of rows.
///
/// Reads see the unit's own staged writes. Nothing is visible to other readers
/// until [`commit`](UnitOfWork::commit) returns `Ok`; dropping the unit
/// discards every staged write and releases the row locks.
pub trait UnitOfWork {
    fn op(&self) -> OpKind;

    /// Load the current value of a locked row (staged value first).
    fn load(&self, row: &RowKey) -> Result<Option<Record>, StoreError>;

    /// Stage a write to a locked row.
    fn stage(&mut self, record: Record) -> Result<(), StoreError>;

    /// Apply every staged write, or none of them.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn incident(&self, id: &IncidentId) -> Result<Option<Incident>, StoreError> {
        let row = RowKey::Incident(id.clone());
        match self.load(&row)? {
            Some(Record::Incident(incident)) => Ok(Some(incident)),
            Some(_) => Err(StoreError::RecordMismatch {
                row: row.to_string(),
            }),
            None => Ok(None),
        }
    }

    fn ambulance(&self, id: &UnitId) -> Result<Option<Ambulance>, StoreError> {
        let row = RowKey::Ambulance(id.clone());
        match self.load(&row)? {
            Some(Record::Ambulance(ambulance)) => Ok(Some(ambulance)),
            Some(_) => Err(StoreError::RecordMismatch {
                row: row.to_string(),
            }),
            None => Ok(None),
        }
    }

    fn item(&self, key: &ItemKey) -> Result<Option<InventoryItem>, StoreError> {
        let row = RowKey::Item(key.clone());
        match self.load(&row)? {
            Some(Record::Item(item)) => Ok(Some(item)),
            Some(_) => Err(StoreError::RecordMismatch {
                row: row.to_string(),
            }),
            None => Ok(None),
        }
    }

    fn put_incident(&mut self, incident: Incident) -> Result<(), StoreError> {
        self.stage(Record::Incident(incident))
    }

    fn put_ambulance(&mut self, ambulance: Ambulance) -> Result<(), StoreError> {
        self.stage(Record::Ambulance(ambulance))
    }

    fn put_item(&mut self, item: InventoryItem) -> Result<(), StoreError> {
        self.stage(Record::Item(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_order_groups_by_collection_then_key() {
        let mut rows = vec![
            RowKey::Item("oxygen".into()),
            RowKey::Ambulance("AMB-02".into()),
            RowKey::Incident("I2".into()),
            RowKey::Item("bandages".into()),
            RowKey::Incident("I1".into()),
        ];
        rows.sort();
        let rendered: Vec<String> = rows.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "incidents/I1",
                "incidents/I2",
                "ambulances/AMB-02",
                "inventory/bandages",
                "inventory/oxygen",
            ]
        );
    }

    #[test]
    fn staging_refuses_unlocked_rows() {
        let mut staging = Staging::new(OpKind::Refuel, &[RowKey::Ambulance("AMB-01".into())]);
        let other = siren_schema::Ambulance::provisioned("AMB-02".into());
        let err = staging.stage(Record::Ambulance(other)).unwrap_err();
        assert!(matches!(err, StoreError::Unlocked(ref r) if r == "ambulances/AMB-02"));
        assert!(staging.is_empty());
    }

    #[test]
    fn staging_keeps_last_write_per_row() {
        let row = RowKey::Ambulance("AMB-01".into());
        let mut staging = Staging::new(OpKind::Repair, &[row.clone()]);
        let mut amb = siren_schema::Ambulance::provisioned("AMB-01".into());
        staging.stage(Record::Ambulance(amb.clone())).unwrap();
        amb.health = 10.0;
        staging.stage(Record::Ambulance(amb.clone())).unwrap();
        assert_eq!(staging.staged(&row), Some(&Record::Ambulance(amb)));
        assert_eq!(staging.into_writes().len(), 1);
    }

    #[test]
    fn op_kind_display() {
        assert_eq!(OpKind::Dispatch.to_string(), "dispatch");
        assert_eq!(OpKind::Restock.to_string(), "restock");
        assert_eq!(OpKind::Adjust.to_string(), "adjust");
    }
}
