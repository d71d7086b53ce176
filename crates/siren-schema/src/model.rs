use crate::types::{IncidentId, ItemKey, UnitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fuel and health ceiling; both are clamped to `[0, FULL_LEVEL]`.
pub const FULL_LEVEL: f64 = 100.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Pending,
    Dispatched,
    OnScene,
    Transporting,
    Closed,
}

impl IncidentStatus {
    pub fn is_open(self) -> bool {
        self != IncidentStatus::Closed
    }

    /// Number of leading checkpoints (`t0..t3`) an incident in this status has stamped.
    pub fn stamped_checkpoints(self) -> usize {
        match self {
            IncidentStatus::Pending => 1,
            IncidentStatus::Dispatched => 2,
            IncidentStatus::OnScene | IncidentStatus::Transporting => 3,
            IncidentStatus::Closed => 4,
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Pending => write!(f, "PENDING"),
            IncidentStatus::Dispatched => write!(f, "DISPATCHED"),
            IncidentStatus::OnScene => write!(f, "ON_SCENE"),
            IncidentStatus::Transporting => write!(f, "TRANSPORTING"),
            IncidentStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    Idle,
    Dispatched,
    OnScene,
    Transporting,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitStatus::Idle => write!(f, "IDLE"),
            UnitStatus::Dispatched => write!(f, "DISPATCHED"),
            UnitStatus::OnScene => write!(f, "ON_SCENE"),
            UnitStatus::Transporting => write!(f, "TRANSPORTING"),
        }
    }
}

/// Lifecycle checkpoints, in index order `t0..t3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Checkpoint {
    Created,
    Dispatched,
    Arrived,
    Closed,
}

impl Checkpoint {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Opaque incident coordinates. Never routed; only stored and echoed back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Default for Location {
    fn default() -> Self {
        Self { x: 50.0, y: 50.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: IncidentId,
    pub status: IncidentStatus,
    pub t0: Option<DateTime<Utc>>,
    pub t1: Option<DateTime<Utc>>,
    pub t2: Option<DateTime<Utc>>,
    pub t3: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub location: Location,
    /// Unit assigned at dispatch. Kept after close as history; the live
    /// binding is [`Ambulance::incident`].
    #[serde(default)]
    pub unit: Option<UnitId>,
}

impl Incident {
    pub fn new(id: IncidentId, location: Location, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: IncidentStatus::Pending,
            t0: Some(created_at),
            t1: None,
            t2: None,
            t3: None,
            location,
            unit: None,
        }
    }

    pub fn timestamps(&self) -> [Option<DateTime<Utc>>; 4] {
        [self.t0, self.t1, self.t2, self.t3]
    }

    pub fn checkpoint(&self, cp: Checkpoint) -> Option<DateTime<Utc>> {
        self.timestamps()[cp.index()]
    }

    /// Latest stamped checkpoint, used to keep stamps non-decreasing.
    pub fn last_stamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps().into_iter().flatten().max()
    }

    /// Stamp `cp` at `at`, clamped forward to the latest earlier stamp.
    /// Returns the stored value. A checkpoint that is already set is kept.
    pub fn stamp(&mut self, cp: Checkpoint, at: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(existing) = self.checkpoint(cp) {
            return existing;
        }
        let at = self.last_stamp().map_or(at, |last| last.max(at));
        let slot = match cp {
            Checkpoint::Created => &mut self.t0,
            Checkpoint::Dispatched => &mut self.t1,
            Checkpoint::Arrived => &mut self.t2,
            Checkpoint::Closed => &mut self.t3,
        };
        *slot = Some(at);
        at
    }

    /// True when the non-null timestamps form exactly the prefix implied by
    /// `status` and are non-decreasing in index order.
    pub fn timestamps_consistent(&self) -> bool {
        let stamps = self.timestamps();
        let expected = self.status.stamped_checkpoints();
        let prefix_ok = stamps
            .iter()
            .enumerate()
            .all(|(i, t)| t.is_some() == (i < expected));
        let ordered = stamps
            .iter()
            .flatten()
            .collect::<Vec<_>>()
            .windows(2)
            .all(|w| w[0] <= w[1]);
        prefix_ok && ordered
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ambulance {
    pub id: UnitId,
    pub status: UnitStatus,
    pub fuel: f64,
    pub health: f64,
    pub supplies_ok: bool,
    /// Open incident this unit is bound to.
    #[serde(default)]
    pub incident: Option<IncidentId>,
}

impl Ambulance {
    /// A freshly provisioned unit: idle, full tank, full health, stocked.
    pub fn provisioned(id: UnitId) -> Self {
        Self {
            id,
            status: UnitStatus::Idle,
            fuel: FULL_LEVEL,
            health: FULL_LEVEL,
            supplies_ok: true,
            incident: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.incident.is_some()
    }

    /// Status is non-idle exactly while a binding exists.
    pub fn binding_consistent(&self) -> bool {
        (self.status == UnitStatus::Idle) == self.incident.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryItem {
    pub key: ItemKey,
    pub name: String,
    pub qty: u32,
    pub min_qty: u32,
}

impl InventoryItem {
    pub fn new(key: ItemKey, name: impl Into<String>, qty: u32, min_qty: u32) -> Self {
        Self {
            key,
            name: name.into(),
            qty,
            min_qty,
        }
    }

    /// Advisory only; never blocks an operation.
    pub fn is_low(&self) -> bool {
        self.qty <= self.min_qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn new_incident_is_pending_with_t0() {
        let inc = Incident::new("I1".into(), Location::new(10.0, 20.0), at(0));
        assert_eq!(inc.status, IncidentStatus::Pending);
        assert_eq!(inc.t0, Some(at(0)));
        assert!(inc.t1.is_none());
        assert!(inc.timestamps_consistent());
    }

    #[test]
    fn stamp_clamps_backwards_clock() {
        let mut inc = Incident::new("I1".into(), Location::default(), at(100));
        let stored = inc.stamp(Checkpoint::Dispatched, at(100) - Duration::seconds(30));
        assert_eq!(stored, at(100));
        assert_eq!(inc.t1, Some(at(100)));
    }

    #[test]
    fn stamp_never_overwrites() {
        let mut inc = Incident::new("I1".into(), Location::default(), at(0));
        inc.stamp(Checkpoint::Created, at(50));
        assert_eq!(inc.t0, Some(at(0)));
    }

    #[test]
    fn consistency_detects_gaps_and_extra_stamps() {
        let mut inc = Incident::new("I1".into(), Location::default(), at(0));
        inc.status = IncidentStatus::OnScene;
        inc.t1 = Some(at(1));
        assert!(!inc.timestamps_consistent(), "t2 missing for ON_SCENE");
        inc.t2 = Some(at(2));
        assert!(inc.timestamps_consistent());
        inc.t3 = Some(at(3));
        assert!(!inc.timestamps_consistent(), "t3 set while open");
    }

    #[test]
    fn consistency_detects_decreasing_stamps() {
        let mut inc = Incident::new("I1".into(), Location::default(), at(10));
        inc.status = IncidentStatus::Dispatched;
        inc.t1 = Some(at(5));
        assert!(!inc.timestamps_consistent());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&IncidentStatus::OnScene).unwrap();
        assert_eq!(json, "\"ON_SCENE\"");
        assert_eq!(UnitStatus::Idle.to_string(), "IDLE");
        assert_eq!(IncidentStatus::Transporting.to_string(), "TRANSPORTING");
    }

    #[test]
    fn incident_serializes_flat_coordinates() {
        let inc = Incident::new("I9".into(), Location::new(1.5, 2.5), at(0));
        let value = serde_json::to_value(&inc).unwrap();
        assert_eq!(value["x"], 1.5);
        assert_eq!(value["y"], 2.5);
        assert_eq!(value["status"], "PENDING");
        let back: Incident = serde_json::from_value(value).unwrap();
        assert_eq!(back, inc);
    }

    #[test]
    fn provisioned_unit_defaults() {
        let amb = Ambulance::provisioned("AMB-01".into());
        assert_eq!(amb.status, UnitStatus::Idle);
        assert!((amb.fuel - FULL_LEVEL).abs() < f64::EPSILON);
        assert!(amb.supplies_ok);
        assert!(amb.binding_consistent());
    }

    #[test]
    fn item_low_threshold_is_inclusive() {
        let mut item = InventoryItem::new("oxygen".into(), "Oxygen Tanks", 6, 5);
        assert!(!item.is_low());
        item.qty = 5;
        assert!(item.is_low());
    }
}
