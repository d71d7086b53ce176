use crate::model::InventoryItem;
use crate::types::{validate_key, ItemKey, KeyError, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("config: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("config: fleet.units must not be empty")]
    EmptyFleet,
    #[error("config: duplicate {kind} '{value}'")]
    Duplicate { kind: &'static str, value: String },
    #[error("config: restock.items must name at least one item")]
    EmptyRestockSet,
    #[error("config: restock item '{0}' is not seeded in [[inventory]]")]
    UnknownRestockItem(String),
    #[error("config: dashboard.log_limit must be at least 1")]
    ZeroLogLimit,
}

/// Parsed `siren.toml`.
///
/// Every section is optional; omitted sections fall back to the stock
/// deployment (three units, bandages and oxygen, 20-entry log).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SirenConfig {
    #[serde(default)]
    pub fleet: FleetSection,
    #[serde(default = "default_inventory")]
    pub inventory: Vec<InventorySeed>,
    #[serde(default)]
    pub restock: RestockSection,
    #[serde(default)]
    pub dashboard: DashboardSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FleetSection {
    pub units: Vec<String>,
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            units: vec!["AMB-01".to_owned(), "AMB-02".to_owned(), "AMB-03".to_owned()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InventorySeed {
    pub key: String,
    pub name: String,
    pub qty: u32,
    #[serde(default)]
    pub min_qty: u32,
}

/// Items a restock consumes one of each.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RestockSection {
    pub items: Vec<String>,
}

impl Default for RestockSection {
    fn default() -> Self {
        Self {
            items: vec!["bandages".to_owned(), "oxygen".to_owned()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DashboardSection {
    #[serde(default = "default_log_limit")]
    pub log_limit: usize,
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            log_limit: default_log_limit(),
        }
    }
}

fn default_log_limit() -> usize {
    20
}

fn default_inventory() -> Vec<InventorySeed> {
    vec![
        InventorySeed {
            key: "bandages".to_owned(),
            name: "Trauma Bandages".to_owned(),
            qty: 50,
            min_qty: 10,
        },
        InventorySeed {
            key: "oxygen".to_owned(),
            name: "Oxygen Tanks".to_owned(),
            qty: 20,
            min_qty: 5,
        },
    ]
}

impl Default for SirenConfig {
    fn default() -> Self {
        Self {
            fleet: FleetSection::default(),
            inventory: default_inventory(),
            restock: RestockSection::default(),
            dashboard: DashboardSection::default(),
        }
    }
}

impl SirenConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fleet.units.is_empty() {
            return Err(ConfigError::EmptyFleet);
        }
        check_unique("unit id", self.fleet.units.iter())?;
        check_unique("item key", self.inventory.iter().map(|s| &s.key))?;

        if self.restock.items.is_empty() {
            return Err(ConfigError::EmptyRestockSet);
        }
        check_unique("restock item", self.restock.items.iter())?;
        let seeded: BTreeSet<&str> = self.inventory.iter().map(|s| s.key.as_str()).collect();
        for item in &self.restock.items {
            if !seeded.contains(item.as_str()) {
                return Err(ConfigError::UnknownRestockItem(item.clone()));
            }
        }

        if self.dashboard.log_limit == 0 {
            return Err(ConfigError::ZeroLogLimit);
        }
        Ok(())
    }

    pub fn unit_ids(&self) -> Result<Vec<UnitId>, ConfigError> {
        self.fleet
            .units
            .iter()
            .map(|u| Ok(UnitId::parse(u)?))
            .collect()
    }

    pub fn restock_items(&self) -> Result<Vec<ItemKey>, ConfigError> {
        self.restock
            .items
            .iter()
            .map(|k| Ok(ItemKey::parse(k)?))
            .collect()
    }

    pub fn seed_items(&self) -> Result<Vec<InventoryItem>, ConfigError> {
        self.inventory
            .iter()
            .map(|s| {
                Ok(InventoryItem::new(
                    ItemKey::parse(&s.key)?,
                    s.name.clone(),
                    s.qty,
                    s.min_qty,
                ))
            })
            .collect()
    }

    pub fn canonical_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn check_unique<'a>(
    kind: &'static str,
    values: impl Iterator<Item = &'a String>,
) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for value in values {
        validate_key(kind, value)?;
        if !seen.insert(value.as_str()) {
            return Err(ConfigError::Duplicate {
                kind,
                value: value.clone(),
            });
        }
    }
    Ok(())
}

pub fn parse_config_str(input: &str) -> Result<SirenConfig, ConfigError> {
    let config: SirenConfig = toml::from_str(input)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<SirenConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_stock_deployment() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config, SirenConfig::default());
        assert_eq!(config.fleet.units.len(), 3);
        assert_eq!(config.restock.items, vec!["bandages", "oxygen"]);
        assert_eq!(config.dashboard.log_limit, 20);
    }

    #[test]
    fn default_config_is_valid() {
        SirenConfig::default().validate().unwrap();
    }

    #[test]
    fn full_document_parses() {
        let config = parse_config_str(
            r#"
[fleet]
units = ["MEDIC-1", "MEDIC-2"]

[[inventory]]
key = "gauze"
name = "Gauze Rolls"
qty = 12
min_qty = 3

[[inventory]]
key = "saline"
name = "Saline Bags"
qty = 4

[restock]
items = ["gauze", "saline"]

[dashboard]
log_limit = 5
"#,
        )
        .unwrap();
        assert_eq!(config.unit_ids().unwrap()[1], "MEDIC-2");
        let items = config.seed_items().unwrap();
        assert_eq!(items[1].min_qty, 0);
        assert_eq!(config.restock_items().unwrap().len(), 2);
        assert_eq!(config.dashboard.log_limit, 5);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(parse_config_str("[fleet]\nunits = [\"A\"]\nspeed = 3\n").is_err());
    }

    #[test]
    fn restock_item_must_be_seeded() {
        let err = parse_config_str("[restock]\nitems = [\"morphine\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRestockItem(ref k) if k == "morphine"));
    }

    #[test]
    fn duplicate_units_rejected() {
        let err = parse_config_str("[fleet]\nunits = [\"A\", \"A\"]\n").unwrap_err();
        assert!(err.to_string().contains("duplicate unit id"));
    }

    #[test]
    fn empty_fleet_rejected() {
        assert!(matches!(
            parse_config_str("[fleet]\nunits = []\n"),
            Err(ConfigError::EmptyFleet)
        ));
    }

    #[test]
    fn invalid_unit_id_rejected() {
        assert!(matches!(
            parse_config_str("[fleet]\nunits = [\"AMB 01\"]\n"),
            Err(ConfigError::InvalidKey(_))
        ));
    }

    #[test]
    fn zero_log_limit_rejected() {
        assert!(parse_config_str("[dashboard]\nlog_limit = 0\n").is_err());
    }

    #[test]
    fn canonical_toml_reparses() {
        let config = SirenConfig::default();
        let text = config.canonical_toml().unwrap();
        assert_eq!(parse_config_str(&text).unwrap(), config);
    }

    #[test]
    fn parse_config_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("siren.toml");
        std::fs::write(&path, "[dashboard]\nlog_limit = 7\n").unwrap();
        assert_eq!(parse_config_file(&path).unwrap().dashboard.log_limit, 7);
        assert!(parse_config_file(dir.path().join("missing.toml")).is_err());
    }
}
