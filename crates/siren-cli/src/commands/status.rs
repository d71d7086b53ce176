use super::{colorize_status, format_level, json_pretty, Failure, EXIT_SUCCESS};
use siren_core::{read_status, Dispatcher, Snapshot};
use siren_schema::{IncidentId, UnitId};

fn print_snapshot(snap: &Snapshot) {
    println!("UNITS");
    println!(
        "  {:<10} {:<14} {:>5} {:>6} {:<8} {:<5} INCIDENT",
        "ID", "STATUS", "FUEL", "HEALTH", "SUPPLIES", "READY"
    );
    for amb in &snap.ambulances {
        let reading = read_status(amb);
        println!(
            "  {:<10} {:<14} {} {:>6} {:<8} {:<5} {}",
            amb.id,
            colorize_status(&reading.status.to_string()),
            format_level(reading.fuel),
            format_level(reading.health),
            if reading.supplies_ok { "ok" } else { "low" },
            if reading.ready { "yes" } else { "no" },
            amb.incident.as_ref().map_or("-", IncidentId::as_str)
        );
    }

    println!("\nINVENTORY");
    for view in snap.inventory.values() {
        println!(
            "  {:<16} {:>6} {}",
            view.item.key,
            view.item.qty,
            if view.low { "LOW" } else { "" }
        );
    }

    println!("\nACTIVE INCIDENTS");
    if snap.active_incidents.is_empty() {
        println!("  none");
    }
    for inc in &snap.active_incidents {
        println!(
            "  {:<12} {:<14} {}",
            inc.id,
            colorize_status(&inc.status.to_string()),
            inc.unit.as_ref().map_or("-", UnitId::as_str)
        );
    }

    println!("\nRECENTLY CLOSED");
    if snap.logs.is_empty() {
        println!("  none");
    }
    for inc in &snap.logs {
        let closed = inc.t3.map_or_else(|| "-".to_owned(), |t| t.to_rfc3339());
        println!(
            "  {:<12} {:<10} {closed}",
            inc.id,
            inc.unit.as_ref().map_or("-", UnitId::as_str)
        );
    }
}

pub fn run(dispatcher: &Dispatcher, limit: Option<usize>, json: bool) -> Result<u8, Failure> {
    let snap = match limit {
        Some(n) => dispatcher.snapshot_with_limit(n)?,
        None => dispatcher.snapshot()?,
    };
    if json {
        println!("{}", json_pretty(&snap)?);
    } else {
        print_snapshot(&snap);
    }
    Ok(EXIT_SUCCESS)
}
