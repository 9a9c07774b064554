// ── Core identity type ──
//
// Every device, zone, and program is addressed by an EntityId. The
// service mostly hands out opaque object-id strings, but newer firmware
// mints UUIDs; both parse to the same type and consumers never care.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical identifier for any entity in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Uuid(Uuid),
    Opaque(String),
}

impl EntityId {
    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Self::Uuid(u) => Some(u),
            Self::Opaque(_) => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&str> {
        match self {
            Self::Opaque(s) => Some(s),
            Self::Uuid(_) => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Opaque(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl From<Uuid> for EntityId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        match Uuid::parse_str(&s) {
            Ok(u) => Self::Uuid(u),
            Err(_) => Self::Opaque(s),
        }
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_from_uuid_string() {
        let id = EntityId::from("550e8400-e29b-41d4-a716-446655440000");
        assert!(id.as_uuid().is_some());
    }

    #[test]
    fn entity_id_from_opaque_string() {
        let id = EntityId::from("5f1a77bcf86cd799439011");
        assert!(id.as_opaque().is_some());
    }

    #[test]
    fn entity_id_display_round_trips() {
        let id: EntityId = "dev-backyard-01".parse().unwrap();
        assert_eq!(id.to_string(), "dev-backyard-01");
    }

    #[test]
    fn uuid_and_opaque_forms_differ() {
        let a = EntityId::from("550e8400-e29b-41d4-a716-446655440000");
        let b = EntityId::Opaque("550e8400-e29b-41d4-a716-446655440000".into());
        assert_ne!(a, b);
    }
}
