use super::{colorize_status, format_level, json_pretty, Failure, EXIT_SUCCESS};
use siren_core::{Dispatcher, MaintenanceAction};
use siren_schema::UnitId;

pub fn run(
    dispatcher: &Dispatcher,
    unit: &str,
    action: MaintenanceAction,
    json: bool,
) -> Result<u8, Failure> {
    let unit = UnitId::parse(unit)?;
    let amb = dispatcher.maintain(&unit, action)?;
    if json {
        println!("{}", json_pretty(&amb)?);
    } else {
        println!(
            "{action} {}: {} fuel {} health {} supplies {}",
            amb.id,
            colorize_status(&amb.status.to_string()),
            format_level(amb.fuel),
            format_level(amb.health),
            if amb.supplies_ok { "ok" } else { "low" }
        );
    }
    Ok(EXIT_SUCCESS)
}

/// Print a unit's readiness summary.
pub fn show(dispatcher: &Dispatcher, unit: &str, json: bool) -> Result<u8, Failure> {
    let unit = UnitId::parse(unit)?;
    let reading = dispatcher.unit_status(&unit)?;
    if json {
        println!("{}", json_pretty(&reading)?);
    } else {
        println!(
            "{unit}: {} fuel {} health {} supplies {} {}",
            colorize_status(&reading.status.to_string()),
            format_level(reading.fuel),
            format_level(reading.health),
            if reading.supplies_ok { "ok" } else { "low" },
            match (reading.ready, reading.bound) {
                (true, _) => "ready",
                (false, true) => "on a call",
                (false, false) => "not ready",
            }
        );
    }
    Ok(EXIT_SUCCESS)
}
