//! Validated identifier types
//!
//! Every identifier is a distinct newtype so an instance id can never be passed
//! where a context id is expected. Tool names follow the strict rules in
//! [`IdValidator`], context ids only need to be non-empty, and instance and
//! generation ids wrap UUIDs.
//!
//! ```rust
//! use conclave_core::identifiers::{ContextId, InstanceId, ToolName};
//!
//! let ctx = ContextId::parse("default").unwrap();
//! let tool: ToolName = "analyzeIntent".parse().unwrap();
//! assert_eq!(ctx.as_str(), "default");
//! assert_eq!(tool.as_str(), "analyzeIntent");
//!
//! let a = InstanceId::from_u128(1);
//! let b = InstanceId::from_u128(2);
//! assert!(a < b);
//! ```

mod validation;

pub use validation::{IdValidationError, IdValidator, MAX_ID_LENGTH};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident, $validate:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and validate the identifier
            pub fn parse(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
                ($validate)(id.as_ref()).map(|s| Self(s.to_string()))
            }

            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Build an identifier without validation (for constants and stored keys)
            #[doc(hidden)]
            pub fn new_unchecked(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdValidationError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_identifier!(
    /// Primary key of a context record; any non-empty string
    ContextId,
    IdValidator::validate_key
);

string_identifier!(
    /// Registered name of a tool
    ToolName,
    IdValidator::validate
);

/// Identity of one running instance.
///
/// Randomly generated per process. The only meaning carried by the value is
/// its ordering, which the leader election uses as a tie-break: the smaller
/// identity wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build an identity from a fixed integer, mostly useful in tests where
    /// the election order must be known in advance
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn parse(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
        Uuid::parse_str(id.as_ref())
            .map(Self)
            .map_err(|e| IdValidationError::MalformedUuid(e.to_string()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = IdValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Primary key of a generation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(Uuid);

impl GenerationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
        Uuid::parse_str(id.as_ref())
            .map(Self)
            .map_err(|e| IdValidationError::MalformedUuid(e.to_string()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GenerationId {
    type Err = IdValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_id_round_trips_through_serde() {
        let id = ContextId::parse("default").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"default\"");
        let back: ContextId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn context_id_rejects_empty_json() {
        let result: Result<ContextId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn context_ids_are_free_form() {
        for raw in ["chat session", "tab:1", "ünïcode/ok"] {
            let id = ContextId::parse(raw).unwrap();
            assert_eq!(id.as_str(), raw);
        }
        assert!(ToolName::parse("bad name").is_err());
    }

    #[test]
    fn instance_ids_order_numerically() {
        let small = InstanceId::from_u128(5);
        let large = InstanceId::from_u128(1 << 100);
        assert!(small < large);
        assert_eq!(small.min(large), small);
    }

    #[test]
    fn random_instance_ids_are_distinct() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }

    #[test]
    fn instance_id_parse_round_trip() {
        let id = InstanceId::new();
        let parsed: InstanceId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(InstanceId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn generation_id_parse() {
        let id = GenerationId::new();
        assert_eq!(GenerationId::parse(id.to_string()).unwrap(), id);
        assert!(matches!(
            GenerationId::parse("nope"),
            Err(IdValidationError::MalformedUuid(_))
        ));
    }
}
