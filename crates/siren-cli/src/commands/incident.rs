use super::{colorize_status, json_pretty, Failure, EXIT_SUCCESS};
use chrono::{DateTime, Utc};
use siren_core::{CreateOutcome, Dispatcher, TransitionKind};
use siren_schema::{Incident, IncidentId, Location, UnitId};

fn stamp(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(|| "-".to_owned(), |t| t.to_rfc3339())
}

fn print_incident(incident: &Incident) {
    println!("id:         {}", incident.id);
    println!("status:     {}", colorize_status(&incident.status.to_string()));
    println!(
        "location:   ({}, {})",
        incident.location.x, incident.location.y
    );
    println!(
        "unit:       {}",
        incident.unit.as_ref().map_or("(none)", UnitId::as_str)
    );
    println!("created:    {}", stamp(incident.t0));
    println!("dispatched: {}", stamp(incident.t1));
    println!("arrived:    {}", stamp(incident.t2));
    println!("closed:     {}", stamp(incident.t3));
}

pub fn create(dispatcher: &Dispatcher, id: &str, x: f64, y: f64, json: bool) -> Result<u8, Failure> {
    let id = IncidentId::parse(id)?;
    let outcome = dispatcher.create_incident(&id, Location::new(x, y))?;
    if json {
        let payload = serde_json::json!({
            "created": outcome.is_created(),
            "incident": outcome.incident(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        match outcome {
            CreateOutcome::Created(inc) => println!("created incident {} at ({x}, {y})", inc.id),
            CreateOutcome::AlreadyExists(inc) => {
                println!("incident {} already exists ({})", inc.id, inc.status);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn transition(
    dispatcher: &Dispatcher,
    id: &str,
    kind: TransitionKind,
    unit: Option<&str>,
    json: bool,
) -> Result<u8, Failure> {
    let id = IncidentId::parse(id)?;
    let unit = unit.map(UnitId::parse).transpose()?;
    let incident = dispatcher.transition_incident(&id, kind, unit.as_ref())?;
    if json {
        println!("{}", json_pretty(&incident)?);
    } else {
        let unit = incident.unit.as_ref().map_or("-", UnitId::as_str);
        println!(
            "{kind} {}: {} (unit {unit})",
            incident.id,
            colorize_status(&incident.status.to_string())
        );
    }
    Ok(EXIT_SUCCESS)
}

pub fn show(dispatcher: &Dispatcher, id: &str, json: bool) -> Result<u8, Failure> {
    let id = IncidentId::parse(id)?;
    let incident = dispatcher.incident(&id)?;
    if json {
        println!("{}", json_pretty(&incident)?);
    } else {
        print_incident(&incident);
    }
    Ok(EXIT_SUCCESS)
}
