//! Guard artifacts: the compiled, cacheable form of a querier's policies.

use crate::{ObjectCondition, Policy, PolicyId, QuerierId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attribute-scoped fragment of a guard.
///
/// The predicate set is produced by the guard builder; the cache only ever
/// reads its attribute and predicate values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardPart {
    pub guard: ObjectCondition,
    /// Policies this part was compiled from.
    pub policy_ids: Vec<PolicyId>,
}

impl GuardPart {
    pub fn new(guard: ObjectCondition, policy_ids: Vec<PolicyId>) -> Self {
        Self { guard, policy_ids }
    }

    pub fn attribute(&self) -> &str {
        &self.guard.attribute
    }
}

/// The cached derived object for one querier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardArtifact {
    /// Stable across incremental merges, replaced on every full build.
    pub artifact_id: Uuid,
    pub querier: QuerierId,
    pub guard_parts: Vec<GuardPart>,
    /// Timestamp of the policy snapshot the artifact reflects.
    pub last_updated: Timestamp,
    /// Incremental merges applied since the last full build.
    pub update_count: u32,
}

impl GuardArtifact {
    /// A freshly built artifact. `update_count` starts at zero.
    pub fn new(querier: QuerierId, guard_parts: Vec<GuardPart>, last_updated: Timestamp) -> Self {
        Self {
            artifact_id: Uuid::now_v7(),
            querier,
            guard_parts,
            last_updated,
            update_count: 0,
        }
    }

    /// Newest `inserted_at` among `policies`, if any.
    pub fn snapshot_of(policies: &[Policy]) -> Option<Timestamp> {
        policies.iter().map(|p| p.inserted_at).max()
    }

    /// Move `last_updated` forward to `at`; never backwards.
    pub fn advance_to(&mut self, at: Timestamp) {
        if at > self.last_updated {
            self.last_updated = at;
        }
    }

    /// Append the parts of an incremental merge, keeping the artifact's identity.
    pub fn absorb(&mut self, parts: Vec<GuardPart>, snapshot: Timestamp) {
        self.guard_parts.extend(parts);
        self.update_count = self.update_count.saturating_add(1);
        self.advance_to(snapshot);
    }

    /// Guard parts scoped to `attribute`.
    pub fn parts_for<'a>(&'a self, attribute: &'a str) -> impl Iterator<Item = &'a GuardPart> + 'a {
        self.guard_parts
            .iter()
            .filter(move |part| part.attribute() == attribute)
    }

    pub fn part_count(&self) -> usize {
        self.guard_parts.len()
    }

    /// Render the guard as a disjunction of SQL predicates.
    pub fn to_sql(&self) -> String {
        if self.guard_parts.is_empty() {
            return "FALSE".to_string();
        }
        self.guard_parts
            .iter()
            .map(|part| {
                let clauses: Vec<String> = part
                    .guard
                    .predicates
                    .iter()
                    .map(|p| format!("{} {} '{}'", part.guard.attribute, p.operator, p.value))
                    .collect();
                format!("({})", clauses.join(" AND "))
            })
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn part(attribute: &str, value: &str) -> GuardPart {
        GuardPart::new(ObjectCondition::equals(attribute, value), vec![PolicyId::new()])
    }

    #[test]
    fn test_absorb_preserves_identity() {
        let t0 = Utc::now();
        let mut artifact = GuardArtifact::new("u1".into(), vec![part("user_id", "1")], t0);
        let id = artifact.artifact_id;

        artifact.absorb(vec![part("location_id", "3100")], t0 + Duration::seconds(5));

        assert_eq!(artifact.artifact_id, id);
        assert_eq!(artifact.part_count(), 2);
        assert_eq!(artifact.update_count, 1);
        assert_eq!(artifact.last_updated, t0 + Duration::seconds(5));
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let t0 = Utc::now();
        let mut artifact = GuardArtifact::new("u1".into(), vec![], t0);
        artifact.advance_to(t0 - Duration::seconds(10));
        assert_eq!(artifact.last_updated, t0);
    }

    #[test]
    fn test_parts_for_filters_by_attribute() {
        let artifact = GuardArtifact::new(
            "u1".into(),
            vec![part("user_id", "1"), part("location_id", "2"), part("user_id", "3")],
            Utc::now(),
        );
        assert_eq!(artifact.parts_for("user_id").count(), 2);
        assert_eq!(artifact.parts_for("start_date").count(), 0);
    }

    #[test]
    fn test_to_sql() {
        let artifact = GuardArtifact::new(
            "u1".into(),
            vec![part("user_id", "1"), part("location_id", "2")],
            Utc::now(),
        );
        assert_eq!(artifact.to_sql(), "(user_id = '1') OR (location_id = '2')");

        let empty = GuardArtifact::new("u1".into(), vec![], Utc::now());
        assert_eq!(empty.to_sql(), "FALSE");
    }
}
