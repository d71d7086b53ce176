use serde::Serialize;
use siren_schema::{Ambulance, Incident, InventoryItem, ItemKey};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemView {
    #[serde(flatten)]
    pub item: InventoryItem,
    pub low: bool,
}

/// Dashboard read model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Every unit, by id.
    pub ambulances: Vec<Ambulance>,
    pub inventory: BTreeMap<ItemKey, ItemView>,
    /// Most recently closed incidents, newest closure first.
    pub logs: Vec<Incident>,
    /// Open incidents, oldest first.
    pub active_incidents: Vec<Incident>,
}

pub fn build_snapshot(
    incidents: Vec<Incident>,
    mut ambulances: Vec<Ambulance>,
    items: Vec<InventoryItem>,
    log_limit: usize,
) -> Snapshot {
    ambulances.sort_by(|a, b| a.id.cmp(&b.id));

    let inventory = items
        .into_iter()
        .map(|item| {
            let low = item.is_low();
            (item.key.clone(), ItemView { item, low })
        })
        .collect();

    let (mut active_incidents, mut logs): (Vec<Incident>, Vec<Incident>) =
        incidents.into_iter().partition(Incident::is_open);
    active_incidents.sort_by(|a, b| a.t0.cmp(&b.t0).then_with(|| a.id.cmp(&b.id)));
    logs.sort_by(|a, b| b.t3.cmp(&a.t3).then_with(|| a.id.cmp(&b.id)));
    logs.truncate(log_limit);

    Snapshot {
        ambulances,
        inventory,
        logs,
        active_incidents,
    }
}
