use std::fmt;

use tasklist_utils::IString;
use uuid::Uuid;

/// Stable per-device identifier used as the `actor` field of every locally
/// generated operation.
///
/// Read from durable storage on first run (see `tasklist_storage`'s actor-id
/// key); generated fresh with [`ActorId::generate`] when absent.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ActorId(IString);

impl ActorId {
    pub fn generate() -> Self {
        Self(IString::from(Uuid::new_v4().to_string().as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_ref().is_empty()
    }
}

impl From<String> for ActorId {
    fn from(value: String) -> Self {
        Self(IString::from(value))
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(IString::from(value))
    }
}

impl AsRef<str> for ActorId {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({})", self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct_and_non_empty() {
        let a = ActorId::generate();
        let b = ActorId::generate();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn empty_actor_is_detected() {
        assert!(ActorId::from("").is_empty());
        assert!(!ActorId::from("device-1").is_empty());
    }
}
