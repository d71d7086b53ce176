//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings. Identifiers double as
//! record file names in the durable store, so `parse` restricts them to
//! `[A-Za-z0-9_-]{1,64}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

pub const MAX_KEY_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{value}': {reason}")]
pub struct KeyError {
    pub kind: &'static str,
    pub value: String,
    pub reason: &'static str,
}

pub fn validate_key(kind: &'static str, value: &str) -> Result<(), KeyError> {
    let fail = |reason| KeyError {
        kind,
        value: value.to_owned(),
        reason,
    };
    if value.is_empty() || value.len() > MAX_KEY_LEN {
        return Err(fail("must be 1-64 characters"));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(fail("must match [a-zA-Z0-9_-]"));
    }
    Ok(())
}

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a string without validation. Use [`Self::parse`] for caller input.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Validate and wrap caller-supplied input.
            pub fn parse(s: &str) -> Result<Self, KeyError> {
                validate_key($kind, s)?;
                Ok(Self(s.to_owned()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_newtype!(
    /// Caller-assigned identifier of an incident.
    IncidentId,
    "incident id"
);

string_newtype!(
    /// Identifier of a provisioned ambulance, e.g. `AMB-01`.
    UnitId,
    "unit id"
);

string_newtype!(
    /// Stable key of an inventory item, e.g. `bandages`.
    ItemKey,
    "item key"
);
