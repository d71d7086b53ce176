use crate::file::FileStore;
use crate::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use siren_schema::{Ambulance, Incident, IncidentStatus, InventoryItem, FULL_LEVEL};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub incidents_checked: usize,
    pub ambulances_checked: usize,
    pub items_checked: usize,
    pub passed: usize,
    pub pending_wal: usize,
    pub failed: Vec<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn checked(&self) -> usize {
        self.incidents_checked + self.ambulances_checked + self.items_checked
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.pending_wal == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityFailure {
    pub row: String,
    pub reason: String,
}

impl IntegrityFailure {
    fn new(row: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            row: row.into(),
            reason: reason.into(),
        }
    }
}

fn verify_collection<T>(
    records: &crate::RecordStore<T>,
    report: &mut IntegrityReport,
) -> Result<(usize, Vec<T>), StoreError>
where
    T: Serialize + DeserializeOwned,
{
    let outcomes = records.scan()?;
    let checked = outcomes.len();
    let mut good = Vec::with_capacity(checked);
    for (key, outcome) in outcomes {
        let reason = match outcome {
            Ok(record) => {
                report.passed += 1;
                good.push(record);
                continue;
            }
            Err(StoreError::IntegrityFailure { actual, .. }) => {
                format!("checksum mismatch: got {actual}")
            }
            Err(e) => format!("read error: {e}"),
        };
        report.failed.push(IntegrityFailure::new(
            format!("{}/{key}", records.collection()),
            reason,
        ));
    }
    Ok((checked, good))
}

/// Verify every record checksum, count pending WAL entries, then check the
/// domain invariants over the records that passed.
pub fn verify_store_integrity(store: &FileStore) -> Result<IntegrityReport, StoreError> {
    let mut report = IntegrityReport::default();

    let (checked, incidents) = verify_collection(store.incident_records(), &mut report)?;
    report.incidents_checked = checked;
    let (checked, ambulances) = verify_collection(store.ambulance_records(), &mut report)?;
    report.ambulances_checked = checked;
    let (checked, items) = verify_collection(store.item_records(), &mut report)?;
    report.items_checked = checked;

    report.pending_wal = store.wal().pending()?.len();
    report
        .failed
        .extend(check_invariants(&incidents, &ambulances, &items));
    Ok(report)
}

/// Cross-entity invariants: timestamp/status consistency, binding symmetry,
/// level bounds.
pub fn check_invariants(
    incidents: &[Incident],
    ambulances: &[Ambulance],
    items: &[InventoryItem],
) -> Vec<IntegrityFailure> {
    let mut failures = Vec::new();
    let by_id: BTreeMap<&str, &Incident> = incidents.iter().map(|i| (i.id.as_str(), i)).collect();
    let mut bound_units: BTreeMap<&str, &str> = BTreeMap::new();

    for incident in incidents {
        let row = format!("incidents/{}", incident.id);
        if !incident.timestamps_consistent() {
            failures.push(IntegrityFailure::new(
                &row,
                format!("timestamps inconsistent with status {}", incident.status),
            ));
        }
        if !incident.location.is_finite() {
            failures.push(IntegrityFailure::new(&row, "non-finite location"));
        }
    }

    for amb in ambulances {
        let row = format!("ambulances/{}", amb.id);
        if !amb.binding_consistent() {
            failures.push(IntegrityFailure::new(
                &row,
                format!("status {} disagrees with binding {:?}", amb.status, amb.incident),
            ));
        }
        for (label, level) in [("fuel", amb.fuel), ("health", amb.health)] {
            if !(0.0..=FULL_LEVEL).contains(&level) {
                failures.push(IntegrityFailure::new(&row, format!("{label} {level} out of range")));
            }
        }
        let Some(incident_id) = amb.incident.as_deref() else {
            continue;
        };
        if let Some(other) = bound_units.insert(incident_id, &amb.id) {
            failures.push(IntegrityFailure::new(
                &row,
                format!("incident {incident_id} also bound to {other}"),
            ));
        }
        match by_id.get(incident_id) {
            None => failures.push(IntegrityFailure::new(
                &row,
                format!("bound to missing incident {incident_id}"),
            )),
            Some(incident) if !incident.is_open() => failures.push(IntegrityFailure::new(
                &row,
                format!("bound to closed incident {incident_id}"),
            )),
            Some(incident) if incident.unit.as_deref() != Some(amb.id.as_str()) => {
                failures.push(IntegrityFailure::new(
                    &row,
                    format!("incident {incident_id} does not name this unit"),
                ));
            }
            Some(_) => {}
        }
    }

    for incident in incidents {
        let needs_unit = matches!(
            incident.status,
            IncidentStatus::Dispatched | IncidentStatus::OnScene | IncidentStatus::Transporting
        );
        if needs_unit && !bound_units.contains_key(incident.id.as_str()) {
            failures.push(IntegrityFailure::new(
                format!("incidents/{}", incident.id),
                format!("{} without a bound unit", incident.status),
            ));
        }
    }

    for item in items {
        if item.name.is_empty() {
            failures.push(IntegrityFailure::new(
                format!("inventory/{}", item.key),
                "empty display name",
            ));
        }
    }

    failures
}
