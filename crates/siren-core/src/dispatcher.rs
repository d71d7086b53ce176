use crate::lifecycle::{self, Binding, TransitionKind};
use crate::view::{build_snapshot, Snapshot};
use crate::registry::{self, UnitReading};
use crate::{ledger, CoreError, Rejection};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use siren_schema::{
    validate_key, Ambulance, Incident, IncidentId, InventoryItem, ItemKey, Location, SirenConfig,
    UnitId,
};
use siren_store::{FileStore, OpKind, RowKey, StateStore};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceAction {
    Refuel,
    Repair,
    Restock,
}

impl MaintenanceAction {
    pub fn op_kind(self) -> OpKind {
        match self {
            MaintenanceAction::Refuel => OpKind::Refuel,
            MaintenanceAction::Repair => OpKind::Repair,
            MaintenanceAction::Restock => OpKind::Restock,
        }
    }
}

impl fmt::Display for MaintenanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenanceAction::Refuel => write!(f, "refuel"),
            MaintenanceAction::Repair => write!(f, "repair"),
            MaintenanceAction::Restock => write!(f, "restock"),
        }
    }
}

impl FromStr for MaintenanceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refuel" => Ok(MaintenanceAction::Refuel),
            "repair" => Ok(MaintenanceAction::Repair),
            "restock" => Ok(MaintenanceAction::Restock),
            other => Err(format!("unknown maintenance action '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Incident),
    /// An incident with this id already existed; it is returned untouched.
    AlreadyExists(Incident),
}

impl CreateOutcome {
    pub fn incident(&self) -> &Incident {
        match self {
            CreateOutcome::Created(incident) | CreateOutcome::AlreadyExists(incident) => incident,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// A single request from a surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create {
        id: IncidentId,
        location: Location,
    },
    Transition {
        id: IncidentId,
        kind: TransitionKind,
        unit: Option<UnitId>,
    },
    Maintain {
        unit: UnitId,
        action: MaintenanceAction,
    },
    Adjust {
        key: ItemKey,
        delta: i64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created(CreateOutcome),
    Incident(Incident),
    Ambulance(Ambulance),
    Item(InventoryItem),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub units_created: Vec<UnitId>,
    pub items_created: Vec<ItemKey>,
}

impl ProvisionReport {
    pub fn is_empty(&self) -> bool {
        self.units_created.is_empty() && self.items_created.is_empty()
    }
}

fn check_key(kind: &'static str, key: &str) -> Result<(), CoreError> {
    validate_key(kind, key)?;
    Ok(())
}

fn unknown_unit(unit: &UnitId) -> CoreError {
    CoreError::InvalidArgument(format!("unknown unit '{unit}'"))
}

/// Applies lifecycle, maintenance and stock requests to a [`StateStore`].
///
/// Each request runs in one unit of work over exactly the rows it touches;
/// validation happens against state read under those locks, and either every
/// staged change commits or none does.
pub struct Dispatcher {
    store: Arc<dyn StateStore>,
    restock_items: Vec<ItemKey>,
    log_limit: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("restock_items", &self.restock_items)
            .field("log_limit", &self.log_limit)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(store: Arc<dyn StateStore>, restock_items: Vec<ItemKey>, log_limit: usize) -> Self {
        Self {
            store,
            restock_items,
            log_limit,
        }
    }

    pub fn from_config(store: Arc<dyn StateStore>, config: &SirenConfig) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self::new(
            store,
            config.restock_items()?,
            config.dashboard.log_limit,
        ))
    }

    /// Open the durable store at `root` with the policy from `config`.
    pub fn open(root: impl AsRef<Path>, config: &SirenConfig) -> Result<Self, CoreError> {
        let store = FileStore::open(root)?;
        Self::from_config(Arc::new(store), config)
    }

    /// Open a durable store that `siren init` (or a server) already created.
    pub fn open_existing(root: impl AsRef<Path>, config: &SirenConfig) -> Result<Self, CoreError> {
        let store = FileStore::open_existing(root)?;
        Self::from_config(Arc::new(store), config)
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn restock_items(&self) -> &[ItemKey] {
        &self.restock_items
    }

    pub fn log_limit(&self) -> usize {
        self.log_limit
    }

    pub fn apply(&self, command: Command) -> Result<Outcome, CoreError> {
        match command {
            Command::Create { id, location } => {
                self.create_incident(&id, location).map(Outcome::Created)
            }
            Command::Transition { id, kind, unit } => self
                .transition_incident(&id, kind, unit.as_ref())
                .map(Outcome::Incident),
            Command::Maintain { unit, action } => {
                self.maintain(&unit, action).map(Outcome::Ambulance)
            }
            Command::Adjust { key, delta } => {
                self.adjust_inventory(&key, delta).map(Outcome::Item)
            }
        }
    }

    /// Create a `PENDING` incident. Creating an existing id is a no-op.
    pub fn create_incident(
        &self,
        id: &IncidentId,
        location: Location,
    ) -> Result<CreateOutcome, CoreError> {
        check_key("incident id", id)?;
        if !location.is_finite() {
            return Err(CoreError::InvalidArgument(format!(
                "location of '{id}' must be finite, got ({}, {})",
                location.x, location.y
            )));
        }

        let mut uow = self
            .store
            .begin(OpKind::Create, &[RowKey::Incident(id.clone())])?;
        if let Some(existing) = uow.incident(id)? {
            debug!("create {id}: already exists ({})", existing.status);
            return Ok(CreateOutcome::AlreadyExists(existing));
        }

        let incident = Incident::new(id.clone(), location, Utc::now());
        uow.put_incident(incident.clone())?;
        uow.commit()?;
        info!("incident {id} created at ({}, {})", location.x, location.y);
        Ok(CreateOutcome::Created(incident))
    }

    /// Move an incident along the lifecycle table.
    ///
    /// `dispatch` requires `unit`. For the other events an omitted unit is
    /// resolved from the incident's binding.
    pub fn transition_incident(
        &self,
        id: &IncidentId,
        kind: TransitionKind,
        unit: Option<&UnitId>,
    ) -> Result<Incident, CoreError> {
        check_key("incident id", id)?;
        let rule = lifecycle::rule(kind);

        let unit_id = match unit {
            Some(unit) => {
                check_key("unit id", unit)?;
                unit.clone()
            }
            None if rule.binding == Binding::Bind => {
                return Err(CoreError::InvalidArgument(format!(
                    "{kind} of '{id}' requires a unit"
                )));
            }
            None => self.resolve_bound_unit(id, kind)?,
        };

        let rows = [
            RowKey::Incident(id.clone()),
            RowKey::Ambulance(unit_id.clone()),
        ];
        let mut uow = self.store.begin(kind.op_kind(), &rows)?;

        let mut incident = uow
            .incident(id)?
            .ok_or_else(|| Rejection::IncidentNotFound(id.clone()))?;
        lifecycle::validate_transition(&incident, kind)?;
        let mut amb = uow.ambulance(&unit_id)?.ok_or_else(|| unknown_unit(&unit_id))?;

        match rule.binding {
            Binding::Bind => registry::bind(&mut amb, id)?,
            Binding::Keep | Binding::Release => registry::check_bound_to(&amb, id)?,
        }
        registry::apply_status(&mut amb, rule.unit_from, rule.unit_to)?;
        if rule.binding == Binding::Release {
            registry::apply_return(&mut amb);
            registry::unbind(&mut amb);
        }

        incident.status = rule.to;
        if let Some(checkpoint) = rule.checkpoint {
            incident.stamp(checkpoint, Utc::now());
        }
        if rule.binding == Binding::Bind {
            incident.unit = Some(unit_id.clone());
        }

        uow.put_incident(incident.clone())?;
        uow.put_ambulance(amb)?;
        uow.commit()?;
        info!("{kind} {id} with {unit_id}: now {}", incident.status);
        Ok(incident)
    }

    /// Read the unit recorded on the incident, for events that omit it.
    /// The binding is re-checked under lock by the caller.
    fn resolve_bound_unit(&self, id: &IncidentId, kind: TransitionKind) -> Result<UnitId, CoreError> {
        let incident = self
            .store
            .incident(id)?
            .ok_or_else(|| Rejection::IncidentNotFound(id.clone()))?;
        lifecycle::validate_transition(&incident, kind)?;
        incident
            .unit
            .ok_or_else(|| Rejection::NoBoundUnit(id.clone()).into())
    }

    /// Refuel, repair or restock a unit. Allowed in any unit status.
    pub fn maintain(&self, unit: &UnitId, action: MaintenanceAction) -> Result<Ambulance, CoreError> {
        check_key("unit id", unit)?;
        let mut rows = vec![RowKey::Ambulance(unit.clone())];
        if action == MaintenanceAction::Restock {
            rows.extend(self.restock_items.iter().cloned().map(RowKey::Item));
        }

        let mut uow = self.store.begin(action.op_kind(), &rows)?;
        let mut amb = uow.ambulance(unit)?.ok_or_else(|| unknown_unit(unit))?;

        match action {
            MaintenanceAction::Refuel => registry::refuel(&mut amb),
            MaintenanceAction::Repair => registry::repair(&mut amb),
            MaintenanceAction::Restock => {
                let mut items = Vec::with_capacity(self.restock_items.len());
                let mut missing = Vec::new();
                for key in &self.restock_items {
                    match uow.item(key)? {
                        Some(item) => items.push(item),
                        None => missing.push(key.clone()),
                    }
                }
                if missing.is_empty() {
                    if let Err(short) = ledger::try_consume(&mut items) {
                        missing = short;
                    }
                }
                if !missing.is_empty() {
                    missing.sort();
                    debug!("restock {unit}: out of {missing:?}");
                    return Err(CoreError::InventoryExhausted { missing });
                }
                for item in items {
                    uow.put_item(item)?;
                }
                amb.supplies_ok = true;
            }
        }

        uow.put_ambulance(amb.clone())?;
        uow.commit()?;
        info!(
            "{action} {unit}: fuel {} health {} supplies_ok {}",
            amb.fuel, amb.health, amb.supplies_ok
        );
        Ok(amb)
    }

    /// Signed stock correction for one item.
    pub fn adjust_inventory(&self, key: &ItemKey, delta: i64) -> Result<InventoryItem, CoreError> {
        check_key("item key", key)?;
        let mut uow = self.store.begin(OpKind::Adjust, &[RowKey::Item(key.clone())])?;
        let mut item = uow
            .item(key)?
            .ok_or_else(|| CoreError::InvalidArgument(format!("unknown item '{key}'")))?;
        ledger::adjust(&mut item, delta)?;
        uow.put_item(item.clone())?;
        uow.commit()?;
        info!("inventory {key} adjusted by {delta}: now {}", item.qty);
        Ok(item)
    }

    /// Create whatever configured units and items are missing. Existing
    /// records are left as they are.
    pub fn provision(&self, config: &SirenConfig) -> Result<ProvisionReport, CoreError> {
        config.validate()?;
        let units = config.unit_ids()?;
        let seeds = config.seed_items()?;

        let rows: Vec<RowKey> = units
            .iter()
            .cloned()
            .map(RowKey::Ambulance)
            .chain(seeds.iter().map(|item| RowKey::Item(item.key.clone())))
            .collect();
        let mut uow = self.store.begin(OpKind::Provision, &rows)?;

        let mut report = ProvisionReport::default();
        for unit in units {
            if uow.ambulance(&unit)?.is_none() {
                uow.put_ambulance(Ambulance::provisioned(unit.clone()))?;
                report.units_created.push(unit);
            }
        }
        for item in seeds {
            if uow.item(&item.key)?.is_none() {
                report.items_created.push(item.key.clone());
                uow.put_item(item)?;
            }
        }
        uow.commit()?;

        if report.is_empty() {
            debug!("provision: nothing to create");
        } else {
            info!(
                "provisioned {} unit(s) and {} item(s)",
                report.units_created.len(),
                report.items_created.len()
            );
        }
        Ok(report)
    }

    pub fn incident(&self, id: &IncidentId) -> Result<Incident, CoreError> {
        check_key("incident id", id)?;
        Ok(self
            .store
            .incident(id)?
            .ok_or_else(|| Rejection::IncidentNotFound(id.clone()))?)
    }

    pub fn ambulance(&self, unit: &UnitId) -> Result<Ambulance, CoreError> {
        check_key("unit id", unit)?;
        self.store.ambulance(unit)?.ok_or_else(|| unknown_unit(unit))
    }

    /// Readiness summary of one unit.
    pub fn unit_status(&self, unit: &UnitId) -> Result<UnitReading, CoreError> {
        self.ambulance(unit).map(|amb| registry::read_status(&amb))
    }

    pub fn snapshot(&self) -> Result<Snapshot, CoreError> {
        self.snapshot_with_limit(self.log_limit)
    }

    pub fn snapshot_with_limit(&self, log_limit: usize) -> Result<Snapshot, CoreError> {
        Ok(build_snapshot(
            self.store.incidents()?,
            self.store.ambulances()?,
            self.store.items()?,
            log_limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use siren_schema::{IncidentStatus, UnitStatus};
    use siren_store::MemoryStore;

    fn dispatcher() -> (Arc<MemoryStore>, Dispatcher) {
        let store = Arc::new(MemoryStore::new());
        let config = SirenConfig::default();
        let d = Dispatcher::from_config(store.clone(), &config).unwrap();
        d.provision(&config).unwrap();
        (store, d)
    }

    #[test]
    fn provision_is_idempotent() {
        let (_store, d) = dispatcher();
        let report = d.provision(&SirenConfig::default()).unwrap();
        assert!(report.is_empty());
        assert_eq!(d.snapshot().unwrap().ambulances.len(), 3);
    }

    #[test]
    fn provision_keeps_existing_state() {
        let (_store, d) = dispatcher();
        d.adjust_inventory(&"oxygen".into(), -20).unwrap();
        d.provision(&SirenConfig::default()).unwrap();
        assert_eq!(d.store().item(&"oxygen".into()).unwrap().unwrap().qty, 0);
    }

    #[test]
    fn dispatch_requires_unit() {
        let (_store, d) = dispatcher();
        d.create_incident(&"I1".into(), Location::default()).unwrap();
        let err = d
            .transition_incident(&"I1".into(), TransitionKind::Dispatch, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn unknown_unit_is_invalid_argument() {
        let (_store, d) = dispatcher();
        d.create_incident(&"I1".into(), Location::default()).unwrap();
        let err = d
            .transition_incident(&"I1".into(), TransitionKind::Dispatch, Some(&"AMB-99".into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            d.incident(&"I1".into()).unwrap().status,
            IncidentStatus::Pending
        );
    }

    #[test]
    fn omitted_unit_resolves_from_binding() {
        let (_store, d) = dispatcher();
        let id: IncidentId = "I1".into();
        d.create_incident(&id, Location::default()).unwrap();
        d.transition_incident(&id, TransitionKind::Dispatch, Some(&"AMB-02".into()))
            .unwrap();
        let inc = d.transition_incident(&id, TransitionKind::Arrive, None).unwrap();
        assert_eq!(inc.status, IncidentStatus::OnScene);
        assert_eq!(
            d.ambulance(&"AMB-02".into()).unwrap().status,
            UnitStatus::OnScene
        );
    }

    #[test]
    fn omitted_unit_on_pending_incident_is_wrong_state() {
        let (_store, d) = dispatcher();
        d.create_incident(&"I1".into(), Location::default()).unwrap();
        let err = d
            .transition_incident(&"I1".into(), TransitionKind::Arrive, None)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Rejected(Rejection::WrongState {
                actual: IncidentStatus::Pending,
                ..
            })
        ));
    }

    #[test]
    fn wrong_unit_is_rejected() {
        let (_store, d) = dispatcher();
        let id: IncidentId = "I1".into();
        d.create_incident(&id, Location::default()).unwrap();
        d.transition_incident(&id, TransitionKind::Dispatch, Some(&"AMB-01".into()))
            .unwrap();
        let err = d
            .transition_incident(&id, TransitionKind::Arrive, Some(&"AMB-02".into()))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Rejected(Rejection::UnitMismatch { .. })
        ));
    }

    #[test]
    fn commit_fault_is_persistence_fault_and_applies_nothing() {
        let (store, d) = dispatcher();
        let id: IncidentId = "I1".into();
        d.create_incident(&id, Location::default()).unwrap();

        store.set_commit_fault(true);
        let err = d
            .transition_incident(&id, TransitionKind::Dispatch, Some(&"AMB-01".into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceFault);
        store.set_commit_fault(false);

        assert_eq!(d.incident(&id).unwrap().status, IncidentStatus::Pending);
        assert!(!d.ambulance(&"AMB-01".into()).unwrap().is_bound());
    }

    #[test]
    fn non_finite_location_rejected() {
        let (_store, d) = dispatcher();
        let err = d
            .create_incident(&"I1".into(), Location::new(f64::NAN, 1.0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn invalid_ids_rejected() {
        let (_store, d) = dispatcher();
        let err = d
            .create_incident(&IncidentId::new("bad id"), Location::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn apply_routes_commands() {
        let (_store, d) = dispatcher();
        let out = d
            .apply(Command::Create {
                id: "I1".into(),
                location: Location::new(3.0, 4.0),
            })
            .unwrap();
        assert!(matches!(out, Outcome::Created(CreateOutcome::Created(_))));

        let out = d
            .apply(Command::Adjust {
                key: "bandages".into(),
                delta: 5,
            })
            .unwrap();
        assert!(matches!(out, Outcome::Item(ref item) if item.qty == 55));

        let out = d
            .apply(Command::Maintain {
                unit: "AMB-01".into(),
                action: MaintenanceAction::Repair,
            })
            .unwrap();
        assert!(matches!(out, Outcome::Ambulance(_)));
    }

    #[test]
    fn maintenance_action_parses() {
        assert_eq!(
            "restock".parse::<MaintenanceAction>().unwrap(),
            MaintenanceAction::Restock
        );
        assert!("wash".parse::<MaintenanceAction>().is_err());
    }
}
