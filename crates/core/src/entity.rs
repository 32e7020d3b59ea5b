//! Entity types: which kind of record a mutation touches.

use serde::{Deserialize, Serialize};

/// Lowercase collection name of the record a mutation targets, e.g.
/// `incidents` or `inspections`.
///
/// Derived from the first path segment after the API prefix; mutations whose
/// URL carries no such segment are grouped under [`EntityType::unknown`] and
/// fall back to the default conflict strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_ascii_lowercase())
    }

    /// The bucket for mutations whose entity type could not be derived.
    pub fn unknown() -> Self {
        Self("unknown".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the entity type from a URL path, given the API prefix.
    ///
    /// `/api/incidents/42?x=1` with prefix `/api/` yields `incidents`.
    /// Returns `None` when the path does not start with the prefix or has no
    /// segment after it.
    pub fn from_path(path: &str, api_prefix: &str) -> Option<Self> {
        let rest = path.strip_prefix(api_prefix)?;
        let segment = rest
            .split(['/', '?'])
            .next()
            .filter(|s| !s.is_empty())?;
        Some(Self::new(segment))
    }
}

impl core::fmt::Display for EntityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_first_segment_after_prefix() {
        let et = EntityType::from_path("/api/incidents/42", "/api/").unwrap();
        assert_eq!(et.as_str(), "incidents");
    }

    #[test]
    fn ignores_query_strings() {
        let et = EntityType::from_path("/api/actions?status=open", "/api/").unwrap();
        assert_eq!(et.as_str(), "actions");
    }

    #[test]
    fn bare_prefix_has_no_entity() {
        assert_eq!(EntityType::from_path("/api/", "/api/"), None);
        assert_eq!(EntityType::from_path("/healthz", "/api/"), None);
    }

    #[test]
    fn normalizes_to_lowercase() {
        let et = EntityType::from_path("/api/Incidents", "/api/").unwrap();
        assert_eq!(et, EntityType::new("incidents"));
    }
}
