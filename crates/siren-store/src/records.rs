use crate::layout::{Collection, StoreLayout};
use crate::{fsync_dir, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use siren_schema::validate_key;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// On-disk form of a record: the entity's JSON, kept byte for byte, plus a
/// blake3 checksum of exactly those bytes.
#[derive(Serialize, Deserialize)]
struct Envelope<'a> {
    #[serde(borrow)]
    record: &'a RawValue,
    checksum: String,
}

/// Replace the file at `dest` with `content` via tempfile + rename + dir fsync.
pub(crate) fn write_atomic(dest: &Path, content: &str) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::Unavailable(format!("{} has no parent", dest.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

fn checksum(json: &str) -> String {
    blake3::hash(json.as_bytes()).to_hex().to_string()
}

/// Checksummed JSON records of one collection, one file per key.
pub struct RecordStore<T> {
    layout: StoreLayout,
    collection: Collection,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RecordStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(layout: StoreLayout, collection: Collection) -> Self {
        Self {
            layout,
            collection,
            _marker: PhantomData,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key("record key", key)?;
        Ok(self.layout.collection_dir(self.collection).join(key))
    }

    /// Serialized envelope for `record`, as `put` would write it.
    pub fn encode(record: &T) -> Result<String, StoreError> {
        let json = serde_json::to_string_pretty(record)?;
        let raw = RawValue::from_string(json)?;
        let envelope = Envelope {
            checksum: checksum(raw.get()),
            record: &raw,
        };
        Ok(serde_json::to_string_pretty(&envelope)?)
    }

    pub fn put(&self, key: &str, record: &T) -> Result<(), StoreError> {
        let dest = self.path(key)?;
        write_atomic(&dest, &Self::encode(record)?)
    }

    /// Raw contents of a stored record, checksum unverified.
    pub fn raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(content) = self.raw(key)? else {
            return Ok(None);
        };
        let envelope: Envelope<'_> = serde_json::from_str(&content)?;
        let actual = checksum(envelope.record.get());
        if actual != envelope.checksum {
            return Err(StoreError::IntegrityFailure {
                key: format!("{}/{key}", self.collection),
                expected: envelope.checksum,
                actual,
            });
        }
        Ok(Some(serde_json::from_str(envelope.record.get())?))
    }

    /// Keys of every record file in the collection, sorted.
    ///
    /// Dot-prefixed names are tempfiles left by an interrupted `put`.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let listing = match fs::read_dir(self.layout.collection_dir(self.collection)) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        for item in listing {
            let item = item?;
            if !item.file_type()?.is_file() {
                continue;
            }
            match item.file_name().into_string() {
                Ok(name) if !name.is_empty() && !name.starts_with('.') => keys.push(name),
                _ => {}
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Every record in key order. One corrupted record fails the listing.
    pub fn list(&self) -> Result<Vec<T>, StoreError> {
        let mut records = Vec::new();
        for key in self.keys()? {
            records.extend(self.get(&key)?);
        }
        Ok(records)
    }

    /// Every key paired with its own read outcome, so one bad record does
    /// not hide the rest. Keys removed mid-scan are skipped.
    pub fn scan(&self) -> Result<Vec<(String, Result<T, StoreError>)>, StoreError> {
        let mut outcomes = Vec::new();
        for key in self.keys()? {
            match self.get(&key) {
                Ok(Some(record)) => outcomes.push((key, Ok(record))),
                Ok(None) => {}
                Err(e) => outcomes.push((key, Err(e))),
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siren_schema::{Ambulance, Incident, InventoryItem, Location};

    fn setup() -> (tempfile::TempDir, StoreLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, layout)
    }

    #[test]
    fn put_and_get_roundtrip() {
        let (_dir, layout) = setup();
        let store = RecordStore::<Ambulance>::new(layout, Collection::Ambulances);
        let amb = Ambulance::provisioned("AMB-01".into());
        store.put("AMB-01", &amb).unwrap();
        assert_eq!(store.get("AMB-01").unwrap(), Some(amb));
    }

    #[test]
    fn missing_record_is_none() {
        let (_dir, layout) = setup();
        let store = RecordStore::<Ambulance>::new(layout, Collection::Ambulances);
        assert!(store.get("AMB-09").unwrap().is_none());
    }

    #[test]
    fn path_traversal_keys_rejected() {
        let (_dir, layout) = setup();
        let store = RecordStore::<Ambulance>::new(layout, Collection::Ambulances);
        assert!(matches!(
            store.get("../version"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(store.path("").is_err());
    }

    #[test]
    fn tampered_record_fails_checksum() {
        let (dir, layout) = setup();
        let store = RecordStore::<InventoryItem>::new(layout, Collection::Inventory);
        store
            .put("oxygen", &InventoryItem::new("oxygen".into(), "Oxygen Tanks", 20, 5))
            .unwrap();

        let path = dir.path().join("store/inventory/oxygen");
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("\"qty\": 20", "\"qty\": 2000")).unwrap();

        let err = store.get("oxygen").unwrap_err();
        assert!(matches!(err, StoreError::IntegrityFailure { ref key, .. } if key == "inventory/oxygen"));
    }

    #[test]
    fn list_is_sorted_and_skips_dotfiles() {
        let (dir, layout) = setup();
        let store = RecordStore::<Ambulance>::new(layout, Collection::Ambulances);
        for id in ["AMB-03", "AMB-01", "AMB-02"] {
            store.put(id, &Ambulance::provisioned(id.into())).unwrap();
        }
        fs::write(dir.path().join("store/ambulances/.tmpXYZ"), "partial").unwrap();

        let ids: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|a| a.id.to_string())
            .collect();
        assert_eq!(ids, vec!["AMB-01", "AMB-02", "AMB-03"]);
    }

    #[test]
    fn scan_reports_corrupt_records_individually() {
        let (dir, layout) = setup();
        let store = RecordStore::<Ambulance>::new(layout, Collection::Ambulances);
        store
            .put("AMB-01", &Ambulance::provisioned("AMB-01".into()))
            .unwrap();
        fs::write(dir.path().join("store/ambulances/AMB-02"), "not json").unwrap();

        let outcomes = store.scan().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(&outcomes[0], (key, Ok(_)) if key == "AMB-01"));
        assert!(matches!(&outcomes[1], (key, Err(_)) if key == "AMB-02"));
        assert!(store.list().is_err());
    }

    #[test]
    fn fractional_coordinates_survive_checksum() {
        let (_dir, layout) = setup();
        let store = RecordStore::<Incident>::new(layout, Collection::Incidents);
        let location = Location::new(12.874560591713891, 1.0715660391465826e-75);
        let incident = Incident::new("I1".into(), location, chrono::Utc::now());
        store.put("I1", &incident).unwrap();

        let back = store.get("I1").unwrap().unwrap();
        assert_eq!(back.location.x.to_bits(), location.x.to_bits());
        assert_eq!(back.location.y.to_bits(), location.y.to_bits());
        assert_eq!(store.scan().unwrap().len(), 1);
        assert!(store.scan().unwrap()[0].1.is_ok());
    }
}
