//! Identifiers, entity models, and configuration for Siren.
//!
//! This crate defines the schema layer shared by the store, the dispatch core,
//! and the outer surfaces: validated string identifiers (`IncidentId`, `UnitId`,
//! `ItemKey`), the three persisted entities (`Incident`, `Ambulance`,
//! `InventoryItem`) with their tagged status enums, and the `siren.toml`
//! configuration describing the provisioned fleet, seeded inventory, and
//! restock policy.

pub mod config;
pub mod model;
pub mod types;

pub use config::{
    parse_config_file, parse_config_str, ConfigError, DashboardSection, FleetSection,
    InventorySeed, RestockSection, SirenConfig,
};
pub use model::{
    Ambulance, Checkpoint, Incident, IncidentStatus, InventoryItem, Location, UnitStatus,
    FULL_LEVEL,
};
pub use types::{validate_key, IncidentId, ItemKey, KeyError, UnitId};
