//! Regenerate-vs-merge decision for stale guards.
//!
//! When policies arrive after a guard was built, the guard can either be
//! patched by appending parts compiled from just the new policies, or rebuilt
//! from the querier's full policy set. Patching is cheaper, but parts only
//! accumulate, so the model rebuilds whenever every new policy is already
//! subsumed by the existing guard (a rebuild yields an equivalent, typically
//! smaller guard) or once `max_chained_merges` patches have been chained.

use once_cell::sync::Lazy;
use sieve_core::config::DEFAULT_MAX_CHAINED_MERGES;
use sieve_core::{
    GuardArtifact, GuardBuilder, ObjectCondition, Policy, QuerierId, SieveResult, Timestamp,
};
use std::collections::HashMap;

/// How a new condition is compared with an existing guard part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStrategy {
    /// Mergeable when any predicate value is shared.
    ValueEquality,
    /// Mergeable per the guard builder's interval check.
    RangeOverlap,
}

static DEFAULT_STRATEGIES: Lazy<HashMap<&'static str, MergeStrategy>> = Lazy::new(|| {
    HashMap::from([
        ("user_id", MergeStrategy::ValueEquality),
        ("user_group", MergeStrategy::ValueEquality),
        ("user_profile", MergeStrategy::ValueEquality),
        ("location_id", MergeStrategy::ValueEquality),
        ("start_date", MergeStrategy::RangeOverlap),
    ])
});

/// Why a stale guard is rebuilt instead of patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateReason {
    /// Every new policy is covered by the existing guard (including the
    /// case of no new policies at all, e.g. after a revocation).
    Subsumed,
    /// The chain of incremental merges reached its cap.
    MergeCapReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Regenerate(RegenerateReason),
    Merge,
}

/// Inputs and result of one decision, kept for logging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeAssessment {
    pub mergeable_count: usize,
    pub total_new: usize,
    pub update_count: u32,
    pub decision: MergeDecision,
}

/// Chooses between incremental merge and full regeneration.
#[derive(Debug, Clone)]
pub struct MergeCostModel {
    strategies: HashMap<String, MergeStrategy>,
    max_chained_merges: u32,
}

impl Default for MergeCostModel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHAINED_MERGES)
    }
}

impl MergeCostModel {
    /// Model with the default attribute table.
    pub fn new(max_chained_merges: u32) -> Self {
        Self {
            strategies: DEFAULT_STRATEGIES
                .iter()
                .map(|(attribute, strategy)| (attribute.to_string(), *strategy))
                .collect(),
            max_chained_merges,
        }
    }

    /// Register or override the strategy for `attribute`.
    pub fn with_strategy(mut self, attribute: impl Into<String>, strategy: MergeStrategy) -> Self {
        self.strategies.insert(attribute.into(), strategy);
        self
    }

    pub fn strategy_for(&self, attribute: &str) -> Option<MergeStrategy> {
        self.strategies.get(attribute).copied()
    }

    pub fn max_chained_merges(&self) -> u32 {
        self.max_chained_merges
    }

    /// Whether `condition` can be merged with the existing guard `part`.
    fn condition_mergeable<B>(
        &self,
        condition: &ObjectCondition,
        part: &ObjectCondition,
        builder: &B,
    ) -> SieveResult<bool>
    where
        B: GuardBuilder + ?Sized,
    {
        if condition.attribute != part.attribute {
            return Ok(false);
        }
        match self.strategy_for(&condition.attribute) {
            Some(MergeStrategy::ValueEquality) => Ok(condition.shares_value_with(part)),
            Some(MergeStrategy::RangeOverlap) => builder.is_range_mergeable(condition, part),
            None => Ok(false),
        }
    }

    /// Whether any condition of `policy` merges with any part of `artifact`.
    pub fn is_mergeable<B>(
        &self,
        policy: &Policy,
        artifact: &GuardArtifact,
        builder: &B,
    ) -> SieveResult<bool>
    where
        B: GuardBuilder + ?Sized,
    {
        for condition in &policy.object_conditions {
            for part in &artifact.guard_parts {
                if self.condition_mergeable(condition, &part.guard, builder)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Pure decision rule.
    pub fn decide(&self, mergeable_count: usize, total_new: usize, update_count: u32) -> MergeDecision {
        if mergeable_count == total_new {
            MergeDecision::Regenerate(RegenerateReason::Subsumed)
        } else if update_count >= self.max_chained_merges {
            MergeDecision::Regenerate(RegenerateReason::MergeCapReached)
        } else {
            MergeDecision::Merge
        }
    }

    /// Count mergeable new policies and decide.
    ///
    /// Errors from the builder's range check abort the assessment.
    pub fn assess<B>(
        &self,
        artifact: &GuardArtifact,
        new_policies: &[Policy],
        builder: &B,
    ) -> SieveResult<MergeAssessment>
    where
        B: GuardBuilder + ?Sized,
    {
        let mut mergeable_count = 0;
        for policy in new_policies {
            if self.is_mergeable(policy, artifact, builder)? {
                mergeable_count += 1;
            }
        }
        let total_new = new_policies.len();
        let update_count = artifact.update_count;
        Ok(MergeAssessment {
            mergeable_count,
            total_new,
            update_count,
            decision: self.decide(mergeable_count, total_new, update_count),
        })
    }

    /// Patch `artifact` with parts compiled from `new_policies`.
    ///
    /// The returned artifact keeps the original's identity, carries every old
    /// part plus the new ones, one more chained merge, and `last_updated`
    /// advanced to `snapshot`. `artifact` itself is left untouched, so a
    /// failing builder cannot corrupt the cached copy.
    pub async fn merge<B>(
        &self,
        querier: &QuerierId,
        artifact: &GuardArtifact,
        new_policies: &[Policy],
        snapshot: Timestamp,
        builder: &B,
    ) -> SieveResult<GuardArtifact>
    where
        B: GuardBuilder + ?Sized,
    {
        let parts = builder.merge_parts(querier, new_policies).await?;
        let mut merged = artifact.clone();
        merged.absorb(parts, snapshot);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use sieve_core::{BuilderError, GuardPart, PolicyId, SieveError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Builder stub: range checks answer `range_answer` and are counted.
    struct StubBuilder {
        range_answer: Result<bool, BuilderError>,
        range_checks: AtomicUsize,
    }

    impl StubBuilder {
        fn answering(answer: bool) -> Self {
            Self {
                range_answer: Ok(answer),
                range_checks: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GuardBuilder for StubBuilder {
        async fn build(&self, querier: &QuerierId, _policies: &[Policy]) -> SieveResult<GuardArtifact> {
            Ok(GuardArtifact::new(querier.clone(), vec![], Utc::now()))
        }

        async fn merge_parts(
            &self,
            _querier: &QuerierId,
            policies: &[Policy],
        ) -> SieveResult<Vec<GuardPart>> {
            Ok(policies
                .iter()
                .flat_map(|p| {
                    p.object_conditions
                        .iter()
                        .map(move |c| GuardPart::new(c.clone(), vec![p.id]))
                })
                .collect())
        }

        fn is_range_mergeable(
            &self,
            _candidate: &ObjectCondition,
            _existing: &ObjectCondition,
        ) -> SieveResult<bool> {
            self.range_checks.fetch_add(1, Ordering::Relaxed);
            self.range_answer.clone().map_err(SieveError::from)
        }
    }

    fn guard(conditions: Vec<ObjectCondition>) -> GuardArtifact {
        GuardArtifact::new(
            "u1".into(),
            conditions
                .into_iter()
                .map(|c| GuardPart::new(c, vec![PolicyId::new()]))
                .collect(),
            Utc::now(),
        )
    }

    fn policy(conditions: Vec<ObjectCondition>) -> Policy {
        Policy::allow("u1", conditions, Utc::now())
    }

    #[test]
    fn test_decision_boundaries() {
        let model = MergeCostModel::default();

        assert_eq!(model.decide(2, 3, 9), MergeDecision::Merge);
        assert_eq!(
            model.decide(2, 3, 10),
            MergeDecision::Regenerate(RegenerateReason::MergeCapReached)
        );
        assert_eq!(
            model.decide(0, 3, 10),
            MergeDecision::Regenerate(RegenerateReason::MergeCapReached)
        );
        assert_eq!(
            model.decide(3, 3, 0),
            MergeDecision::Regenerate(RegenerateReason::Subsumed)
        );
        assert_eq!(
            model.decide(0, 0, 0),
            MergeDecision::Regenerate(RegenerateReason::Subsumed)
        );
    }

    #[test]
    fn test_custom_cap() {
        let model = MergeCostModel::new(2);
        assert_eq!(model.decide(0, 1, 1), MergeDecision::Merge);
        assert_eq!(
            model.decide(0, 1, 2),
            MergeDecision::Regenerate(RegenerateReason::MergeCapReached)
        );
    }

    #[test]
    fn test_default_strategy_table() {
        let model = MergeCostModel::default();
        for attribute in ["user_id", "user_group", "user_profile", "location_id"] {
            assert_eq!(model.strategy_for(attribute), Some(MergeStrategy::ValueEquality));
        }
        assert_eq!(model.strategy_for("start_date"), Some(MergeStrategy::RangeOverlap));
        assert_eq!(model.strategy_for("energy"), None);

        let extended = model.with_strategy("energy", MergeStrategy::ValueEquality);
        assert_eq!(extended.strategy_for("energy"), Some(MergeStrategy::ValueEquality));
    }

    #[test]
    fn test_value_equality_merge() {
        let model = MergeCostModel::default();
        let builder = StubBuilder::answering(false);
        let artifact = guard(vec![ObjectCondition::equals("location_id", "3100")]);

        let shared = policy(vec![ObjectCondition::equals("location_id", "3100")]);
        let disjoint = policy(vec![ObjectCondition::equals("location_id", "4200")]);
        let other_attribute = policy(vec![ObjectCondition::equals("user_id", "3100")]);

        assert!(model.is_mergeable(&shared, &artifact, &builder).unwrap());
        assert!(!model.is_mergeable(&disjoint, &artifact, &builder).unwrap());
        assert!(!model.is_mergeable(&other_attribute, &artifact, &builder).unwrap());
    }

    #[test]
    fn test_unlisted_attribute_is_never_mergeable() {
        let model = MergeCostModel::default();
        let builder = StubBuilder::answering(true);
        let artifact = guard(vec![ObjectCondition::equals("energy", "5")]);
        let p = policy(vec![ObjectCondition::equals("energy", "5")]);

        assert!(!model.is_mergeable(&p, &artifact, &builder).unwrap());
        assert_eq!(builder.range_checks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_start_date_delegates_to_builder() {
        let model = MergeCostModel::default();
        let artifact = guard(vec![ObjectCondition::between(
            "start_date",
            "2018-01-01",
            "2018-01-31",
        )]);
        let p = policy(vec![ObjectCondition::between(
            "start_date",
            "2018-06-01",
            "2018-06-30",
        )]);

        let yes = StubBuilder::answering(true);
        assert!(model.is_mergeable(&p, &artifact, &yes).unwrap());
        assert_eq!(yes.range_checks.load(Ordering::Relaxed), 1);

        let no = StubBuilder::answering(false);
        assert!(!model.is_mergeable(&p, &artifact, &no).unwrap());
    }

    #[test]
    fn test_range_check_error_propagates() {
        let model = MergeCostModel::default();
        let failing = StubBuilder {
            range_answer: Err(BuilderError::RangeCheckFailed {
                attribute: "start_date".to_string(),
                reason: "bad interval".to_string(),
            }),
            range_checks: AtomicUsize::new(0),
        };
        let artifact = guard(vec![ObjectCondition::between("start_date", "a", "b")]);
        let p = policy(vec![ObjectCondition::between("start_date", "a", "c")]);

        let err = model.assess(&artifact, &[p], &failing).unwrap_err();
        assert!(matches!(err, SieveError::Builder(BuilderError::RangeCheckFailed { .. })));
    }

    #[test]
    fn test_policy_counted_once_first_match_wins() {
        let model = MergeCostModel::default();
        let builder = StubBuilder::answering(true);
        let artifact = guard(vec![
            ObjectCondition::equals("user_id", "1"),
            ObjectCondition::equals("location_id", "3100"),
            ObjectCondition::between("start_date", "a", "z"),
        ]);
        // Matches on its first condition; the range check is never reached.
        let p = policy(vec![
            ObjectCondition::equals("user_id", "1"),
            ObjectCondition::equals("location_id", "3100"),
            ObjectCondition::between("start_date", "b", "c"),
        ]);

        let assessment = model.assess(&artifact, &[p], &builder).unwrap();
        assert_eq!(assessment.mergeable_count, 1);
        assert_eq!(assessment.total_new, 1);
        assert_eq!(builder.range_checks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_assess_mixed_new_policies() {
        let model = MergeCostModel::default();
        let builder = StubBuilder::answering(false);
        let mut artifact = guard(vec![ObjectCondition::equals("user_group", "faculty")]);
        artifact.update_count = 4;

        let new_policies = vec![
            policy(vec![ObjectCondition::equals("user_group", "faculty")]),
            policy(vec![ObjectCondition::equals("user_group", "staff")]),
        ];
        let assessment = model.assess(&artifact, &new_policies, &builder).unwrap();

        assert_eq!(
            assessment,
            MergeAssessment {
                mergeable_count: 1,
                total_new: 2,
                update_count: 4,
                decision: MergeDecision::Merge,
            }
        );
    }

    #[tokio::test]
    async fn test_merge_appends_and_preserves_identity() {
        let model = MergeCostModel::default();
        let builder = StubBuilder::answering(false);
        let artifact = guard(vec![ObjectCondition::equals("user_id", "1")]);
        let new_policies = vec![policy(vec![ObjectCondition::equals("location_id", "9")])];
        let snapshot = artifact.last_updated + chrono::Duration::seconds(3);

        let merged = model
            .merge(&"u1".into(), &artifact, &new_policies, snapshot, &builder)
            .await
            .unwrap();

        assert_eq!(merged.artifact_id, artifact.artifact_id);
        assert_eq!(merged.part_count(), 2);
        assert_eq!(merged.guard_parts[0], artifact.guard_parts[0]);
        assert_eq!(merged.update_count, artifact.update_count + 1);
        assert_eq!(merged.last_updated, snapshot);
        assert_eq!(artifact.part_count(), 1);
    }
}
