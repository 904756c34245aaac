//! Identifiers for incidents whose source row carries none.

use std::collections::HashSet;

use uuid::Uuid;
use ward_patrol_incident_models::IncidentId;

/// Length of a generated id in hex characters.
pub const GENERATED_ID_LEN: usize = 64;

/// Hands out random incident ids that do not collide with any id it has
/// already seen.
#[derive(Debug, Default)]
pub struct IncidentIdGenerator {
    taken: HashSet<String>,
}

impl IncidentIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A generator that will never reissue any of `existing`.
    #[must_use]
    pub fn with_existing<I, S>(existing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taken: existing.into_iter().map(Into::into).collect(),
        }
    }

    /// Marks `id` as used. Returns `false` if it already was.
    pub fn reserve(&mut self, id: &str) -> bool {
        self.taken.insert(id.to_string())
    }

    /// A fresh 64-character hex id.
    pub fn generate(&mut self) -> IncidentId {
        loop {
            let mut bytes = [0u8; 32];
            bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
            bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
            let candidate = hex::encode(bytes);

            if self.taken.insert(candidate.clone()) {
                return IncidentId::new(candidate);
            }
            log::debug!("Generated incident id collided, retrying");
        }
    }

    /// Number of ids seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.taken.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_hex_and_unique() {
        let mut ids = IncidentIdGenerator::new();
        let generated: HashSet<String> = (0..500).map(|_| ids.generate().to_string()).collect();

        assert_eq!(generated.len(), 500);
        assert!(generated.iter().all(|id| id.len() == GENERATED_ID_LEN
            && id.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn reserve_reports_duplicates() {
        let mut ids = IncidentIdGenerator::with_existing(["abc"]);
        assert!(!ids.reserve("abc"));
        assert!(ids.reserve("def"));
        assert_eq!(ids.len(), 2);
    }
}
