use super::{json_pretty, Failure, EXIT_SUCCESS};
use console::Style;
use siren_core::{CoreError, Dispatcher};
use siren_schema::{InventoryItem, ItemKey};

fn print_item(item: &InventoryItem) {
    let marker = if item.is_low() {
        Style::new().red().apply_to("LOW").to_string()
    } else {
        String::new()
    };
    println!(
        "{:<16} {:<24} {:>6} {:>6} {marker}",
        item.key, item.name, item.qty, item.min_qty
    );
}

/// Without a delta, print stock levels; with one, apply it to `key`.
pub fn run(
    dispatcher: &Dispatcher,
    key: Option<&str>,
    delta: Option<i64>,
    json: bool,
) -> Result<u8, Failure> {
    let key = key.map(ItemKey::parse).transpose()?;

    if let (Some(key), Some(delta)) = (&key, delta) {
        let item = dispatcher.adjust_inventory(key, delta)?;
        if json {
            println!("{}", json_pretty(&item)?);
        } else {
            println!("{}: {} (adjusted by {delta:+})", item.key, item.qty);
        }
        return Ok(EXIT_SUCCESS);
    }

    let mut items = dispatcher
        .store()
        .items()
        .map_err(CoreError::from)?;
    if let Some(key) = &key {
        items.retain(|item| &item.key == key);
        if items.is_empty() {
            return Err(CoreError::InvalidArgument(format!(
                "unknown inventory item '{key}'"
            ))
            .into());
        }
    }

    if json {
        println!("{}", json_pretty(&items)?);
    } else if items.is_empty() {
        println!("no inventory items (run `siren init`)");
    } else {
        println!("{:<16} {:<24} {:>6} {:>6}", "KEY", "NAME", "QTY", "MIN");
        for item in &items {
            print_item(item);
        }
    }
    Ok(EXIT_SUCCESS)
}
