use crate::Rejection;
use serde::{Deserialize, Serialize};
use siren_schema::{Checkpoint, Incident, IncidentStatus, UnitStatus};
use siren_store::OpKind;
use std::fmt;
use std::str::FromStr;

/// A lifecycle event applied to an existing incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Dispatch,
    Arrive,
    Transport,
    Close,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 4] = [
        TransitionKind::Dispatch,
        TransitionKind::Arrive,
        TransitionKind::Transport,
        TransitionKind::Close,
    ];

    pub fn op_kind(self) -> OpKind {
        match self {
            TransitionKind::Dispatch => OpKind::Dispatch,
            TransitionKind::Arrive => OpKind::Arrive,
            TransitionKind::Transport => OpKind::Transport,
            TransitionKind::Close => OpKind::Close,
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Dispatch => write!(f, "dispatch"),
            TransitionKind::Arrive => write!(f, "arrive"),
            TransitionKind::Transport => write!(f, "transport"),
            TransitionKind::Close => write!(f, "close"),
        }
    }
}

impl FromStr for TransitionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dispatch" => Ok(TransitionKind::Dispatch),
            "arrive" => Ok(TransitionKind::Arrive),
            "transport" => Ok(TransitionKind::Transport),
            "close" => Ok(TransitionKind::Close),
            other => Err(format!("unknown transition '{other}'")),
        }
    }
}

/// What a transition does to the unit↔incident binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Bind the named idle unit to the incident.
    Bind,
    /// Require the unit already bound to the incident.
    Keep,
    /// Require the bound unit, apply return wear, then release it.
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub kind: TransitionKind,
    pub from: IncidentStatus,
    pub to: IncidentStatus,
    pub checkpoint: Option<Checkpoint>,
    pub unit_from: UnitStatus,
    pub unit_to: UnitStatus,
    pub binding: Binding,
}

/// The transition table, indexed in [`TransitionKind::ALL`] order.
pub const RULES: [Rule; 4] = [
    Rule {
        kind: TransitionKind::Dispatch,
        from: IncidentStatus::Pending,
        to: IncidentStatus::Dispatched,
        checkpoint: Some(Checkpoint::Dispatched),
        unit_from: UnitStatus::Idle,
        unit_to: UnitStatus::Dispatched,
        binding: Binding::Bind,
    },
    Rule {
        kind: TransitionKind::Arrive,
        from: IncidentStatus::Dispatched,
        to: IncidentStatus::OnScene,
        checkpoint: Some(Checkpoint::Arrived),
        unit_from: UnitStatus::Dispatched,
        unit_to: UnitStatus::OnScene,
        binding: Binding::Keep,
    },
    Rule {
        kind: TransitionKind::Transport,
        from: IncidentStatus::OnScene,
        to: IncidentStatus::Transporting,
        checkpoint: None,
        unit_from: UnitStatus::OnScene,
        unit_to: UnitStatus::Transporting,
        binding: Binding::Keep,
    },
    Rule {
        kind: TransitionKind::Close,
        from: IncidentStatus::Transporting,
        to: IncidentStatus::Closed,
        checkpoint: Some(Checkpoint::Closed),
        unit_from: UnitStatus::Transporting,
        unit_to: UnitStatus::Idle,
        binding: Binding::Release,
    },
];

pub fn rule(kind: TransitionKind) -> &'static Rule {
    &RULES[kind as usize]
}

/// Check that `incident` is in the rule's source status.
pub fn validate_transition(
    incident: &Incident,
    kind: TransitionKind,
) -> Result<&'static Rule, Rejection> {
    let rule = rule(kind);
    if incident.status == rule.from {
        Ok(rule)
    } else {
        Err(Rejection::WrongState {
            incident: incident.id.clone(),
            event: kind,
            expected: rule.from,
            actual: incident.status,
        })
    }
}
