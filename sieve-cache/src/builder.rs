//! Reference guard builder.
//!
//! Every allow-policy is guarded by one of its object conditions, preferring
//! an equality condition over a range. Policies guarded by the same condition
//! share one guard part, so the part count is the number of distinct guard
//! conditions. The remaining conditions of a policy are left for the executor
//! to check per row.

use async_trait::async_trait;
use sieve_core::{
    BuilderError, GuardArtifact, GuardBuilder, GuardPart, ObjectCondition, Operator, Policy,
    QuerierId, SieveResult,
};

/// Groups allow-policies by guard condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupingGuardBuilder;

impl GroupingGuardBuilder {
    pub fn new() -> Self {
        Self
    }

    fn guard_condition(policy: &Policy) -> Option<&ObjectCondition> {
        let is_equality = |c: &&ObjectCondition| {
            !c.predicates.is_empty() && c.predicates.iter().all(|p| p.operator == Operator::Eq)
        };
        policy
            .object_conditions
            .iter()
            .find(is_equality)
            .or_else(|| policy.object_conditions.iter().find(|c| !c.predicates.is_empty()))
    }

    /// Group `policies` into guard parts, first-seen order.
    fn group(querier: &QuerierId, policies: &[Policy]) -> Result<Vec<GuardPart>, String> {
        let mut parts: Vec<GuardPart> = Vec::new();
        for policy in policies.iter().filter(|p| p.is_allow()) {
            if policy.querier != *querier {
                return Err(format!("policy {} belongs to {}", policy.id, policy.querier));
            }
            let condition = Self::guard_condition(policy)
                .ok_or_else(|| format!("policy {} has no usable object condition", policy.id))?;

            let mut condition = condition.clone();
            condition.predicates.dedup();

            match parts.iter_mut().find(|part| part.guard == condition) {
                Some(part) => part.policy_ids.push(policy.id),
                None => parts.push(GuardPart::new(condition, vec![policy.id])),
            }
        }
        Ok(parts)
    }
}

#[async_trait]
impl GuardBuilder for GroupingGuardBuilder {
    async fn build(&self, querier: &QuerierId, policies: &[Policy]) -> SieveResult<GuardArtifact> {
        let parts = Self::group(querier, policies).map_err(|reason| BuilderError::BuildFailed {
            querier: querier.clone(),
            reason,
        })?;
        let snapshot = GuardArtifact::snapshot_of(policies).ok_or_else(|| {
            BuilderError::BuildFailed {
                querier: querier.clone(),
                reason: "no policies to build from".to_string(),
            }
        })?;
        tracing::debug!(
            querier = %querier,
            policies = policies.len(),
            parts = parts.len(),
            "Built guard"
        );
        Ok(GuardArtifact::new(querier.clone(), parts, snapshot))
    }

    async fn merge_parts(
        &self,
        querier: &QuerierId,
        policies: &[Policy],
    ) -> SieveResult<Vec<GuardPart>> {
        let parts = Self::group(querier, policies).map_err(|reason| BuilderError::MergeFailed {
            querier: querier.clone(),
            reason,
        })?;
        Ok(parts)
    }

    fn is_range_mergeable(
        &self,
        candidate: &ObjectCondition,
        existing: &ObjectCondition,
    ) -> SieveResult<bool> {
        if candidate.attribute != existing.attribute {
            return Ok(false);
        }
        if candidate.predicates.is_empty() {
            return Err(BuilderError::RangeCheckFailed {
                attribute: candidate.attribute.clone(),
                reason: "candidate condition has no predicates".to_string(),
            }
            .into());
        }
        let candidate = candidate.range();
        let existing = existing.range();
        Ok(existing.contains(&candidate) || candidate.overlaps(&existing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sieve_core::{Action, BooleanPredicate, SieveError};

    fn q() -> QuerierId {
        QuerierId::new("u1")
    }

    #[tokio::test]
    async fn test_build_groups_identical_conditions() {
        let t0 = Utc::now();
        let policies = vec![
            Policy::allow("u1", vec![ObjectCondition::equals("location_id", "3100")], t0),
            Policy::allow(
                "u1",
                vec![ObjectCondition::equals("location_id", "3100")],
                t0 + Duration::seconds(1),
            ),
            Policy::allow("u1", vec![ObjectCondition::equals("user_id", "7")], t0),
        ];

        let artifact = GroupingGuardBuilder::new().build(&q(), &policies).await.unwrap();

        assert_eq!(artifact.part_count(), 2);
        assert_eq!(artifact.guard_parts[0].policy_ids, vec![policies[0].id, policies[1].id]);
        assert_eq!(artifact.guard_parts[1].policy_ids, vec![policies[2].id]);
        assert_eq!(artifact.last_updated, t0 + Duration::seconds(1));
        assert_eq!(artifact.update_count, 0);
    }

    #[tokio::test]
    async fn test_equality_condition_preferred() {
        let policy = Policy::allow(
            "u1",
            vec![
                ObjectCondition::between("start_date", "2018-01-01", "2018-01-31"),
                ObjectCondition::equals("user_group", "faculty"),
            ],
            Utc::now(),
        );

        let parts = GroupingGuardBuilder::new()
            .merge_parts(&q(), &[policy])
            .await
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].attribute(), "user_group");
    }

    #[tokio::test]
    async fn test_deny_policies_are_skipped() {
        let mut deny = Policy::allow("u1", vec![ObjectCondition::equals("user_id", "1")], Utc::now());
        deny.action = Action::Deny;
        let allow = Policy::allow("u1", vec![ObjectCondition::equals("user_id", "2")], Utc::now());

        let parts = GroupingGuardBuilder::new()
            .merge_parts(&q(), &[deny, allow])
            .await
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].guard.shares_value_with(&ObjectCondition::equals("user_id", "2")));
    }

    #[tokio::test]
    async fn test_build_rejects_unguardable_policy() {
        let policy = Policy::allow("u1", vec![ObjectCondition::new("user_id", vec![])], Utc::now());
        let err = GroupingGuardBuilder::new()
            .build(&q(), &[policy])
            .await
            .unwrap_err();
        assert!(matches!(err, SieveError::Builder(BuilderError::BuildFailed { .. })));
    }

    #[tokio::test]
    async fn test_build_rejects_foreign_policy() {
        let policy = Policy::allow("u2", vec![ObjectCondition::equals("user_id", "1")], Utc::now());
        let err = GroupingGuardBuilder::new()
            .merge_parts(&q(), &[policy])
            .await
            .unwrap_err();
        assert!(matches!(err, SieveError::Builder(BuilderError::MergeFailed { .. })));
    }

    #[tokio::test]
    async fn test_build_with_no_policies_fails() {
        let err = GroupingGuardBuilder::new().build(&q(), &[]).await.unwrap_err();
        assert!(matches!(err, SieveError::Builder(BuilderError::BuildFailed { .. })));
    }

    #[test]
    fn test_range_mergeable() {
        let builder = GroupingGuardBuilder::new();
        let jan = ObjectCondition::between("start_date", "2018-01-01", "2018-01-31");
        let mid_jan = ObjectCondition::between("start_date", "2018-01-10", "2018-01-20");
        let late_jan = ObjectCondition::between("start_date", "2018-01-25", "2018-02-05");
        let june = ObjectCondition::between("start_date", "2018-06-01", "2018-06-30");
        let after = ObjectCondition::new(
            "start_date",
            vec![BooleanPredicate::new(Operator::Gt, "2018-01-31")],
        );

        assert!(builder.is_range_mergeable(&mid_jan, &jan).unwrap());
        assert!(builder.is_range_mergeable(&late_jan, &jan).unwrap());
        assert!(!builder.is_range_mergeable(&june, &jan).unwrap());
        assert!(!builder.is_range_mergeable(&after, &jan).unwrap());
        assert!(!builder
            .is_range_mergeable(&ObjectCondition::equals("user_id", "2018-01-10"), &jan)
            .unwrap());
    }

    #[test]
    fn test_range_check_without_predicates_fails() {
        let builder = GroupingGuardBuilder::new();
        let err = builder
            .is_range_mergeable(
                &ObjectCondition::new("start_date", vec![]),
                &ObjectCondition::between("start_date", "a", "b"),
            )
            .unwrap_err();
        assert!(matches!(err, SieveError::Builder(BuilderError::RangeCheckFailed { .. })));
    }
}
