//! Core identifier types with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated device identifier.
    ///
    /// Device IDs must be non-empty strings. Payloads that carry no
    /// recognizable identifier are attributed to the [`DeviceId::unknown`]
    /// sentinel rather than dropped.
    DeviceId, "device ID"
);

define_string_id!(
    /// A validated session correlation token.
    ///
    /// Session IDs are optional in the telemetry; when present they tie a
    /// start event to its matching end event.
    SessionId, "session ID"
);

/// Sentinel value used for payloads without a device identifier.
const UNKNOWN_DEVICE_ID: &str = "unknown";

impl DeviceId {
    /// The sentinel ID used when a payload carries no device identifier.
    #[must_use]
    pub fn unknown() -> Self {
        Self(UNKNOWN_DEVICE_ID.to_string())
    }

    /// Returns true if this is the sentinel ID for unattributed telemetry.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_DEVICE_ID
    }
}
