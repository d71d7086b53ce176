//! Ambulance registry rules: pure updates over a loaded [`Ambulance`].

use crate::Rejection;
use serde::Serialize;
use siren_schema::{Ambulance, IncidentId, UnitStatus, FULL_LEVEL};

/// Fuel spent on a completed run.
pub const RETURN_FUEL_COST: f64 = 25.0;
/// Health lost on a completed run.
pub const RETURN_WEAR: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitReading {
    pub status: UnitStatus,
    pub fuel: f64,
    pub health: f64,
    pub supplies_ok: bool,
    pub bound: bool,
    /// Idle, stocked and with fuel and health left. Advisory; dispatch does not check it.
    pub ready: bool,
}

pub fn clamp_level(level: f64) -> f64 {
    level.clamp(0.0, FULL_LEVEL)
}

pub fn read_status(unit: &Ambulance) -> UnitReading {
    UnitReading {
        status: unit.status,
        fuel: unit.fuel,
        health: unit.health,
        supplies_ok: unit.supplies_ok,
        bound: unit.is_bound(),
        ready: unit.status == UnitStatus::Idle
            && unit.supplies_ok
            && unit.fuel > 0.0
            && unit.health > 0.0,
    }
}

/// Bind `unit` to `incident`. Re-binding to the same incident is a no-op.
pub fn bind(unit: &mut Ambulance, incident: &IncidentId) -> Result<(), Rejection> {
    match &unit.incident {
        Some(current) if current == incident => Ok(()),
        Some(current) => Err(Rejection::UnitBound {
            unit: unit.id.clone(),
            incident: current.clone(),
        }),
        None => {
            unit.incident = Some(incident.clone());
            Ok(())
        }
    }
}

/// Require that `unit` serves `incident`.
pub fn check_bound_to(unit: &Ambulance, incident: &IncidentId) -> Result<(), Rejection> {
    if unit.incident.as_ref() == Some(incident) {
        Ok(())
    } else {
        Err(Rejection::UnitMismatch {
            unit: unit.id.clone(),
            incident: incident.clone(),
        })
    }
}

pub fn unbind(unit: &mut Ambulance) {
    unit.incident = None;
}

pub fn apply_status(
    unit: &mut Ambulance,
    expected: UnitStatus,
    new: UnitStatus,
) -> Result<(), Rejection> {
    if unit.status != expected {
        return Err(Rejection::UnitState {
            unit: unit.id.clone(),
            expected,
            actual: unit.status,
        });
    }
    unit.status = new;
    Ok(())
}

pub fn apply_return(unit: &mut Ambulance) {
    unit.fuel = clamp_level(unit.fuel - RETURN_FUEL_COST);
    unit.health = clamp_level(unit.health - RETURN_WEAR);
    unit.supplies_ok = false;
}

pub fn refuel(unit: &mut Ambulance) {
    unit.fuel = FULL_LEVEL;
}

pub fn repair(unit: &mut Ambulance) {
    unit.health = FULL_LEVEL;
}
