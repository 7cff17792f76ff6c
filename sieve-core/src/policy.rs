//! Access-control policies and their object conditions.

use crate::{PolicyId, QuerierId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Whether a policy grants or denies access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    Deny,
}

impl Action {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Comparison operator of a boolean predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A single `attribute <op> value` comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BooleanPredicate {
    pub operator: Operator,
    pub value: String,
}

impl BooleanPredicate {
    pub fn new(operator: Operator, value: impl Into<String>) -> Self {
        Self {
            operator,
            value: value.into(),
        }
    }

    pub fn eq(value: impl Into<String>) -> Self {
        Self::new(Operator::Eq, value)
    }
}

/// One end of a [`ValueRange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeBound {
    pub value: String,
    pub inclusive: bool,
}

/// Interval described by the comparison predicates of a condition.
///
/// Values compare lexicographically, which orders ISO-8601 dates and times
/// correctly. A missing bound is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValueRange {
    pub lower: Option<RangeBound>,
    pub upper: Option<RangeBound>,
}

impl ValueRange {
    /// True when the two intervals share at least one point.
    pub fn overlaps(&self, other: &ValueRange) -> bool {
        lower_reaches_upper(self.lower.as_ref(), other.upper.as_ref())
            && lower_reaches_upper(other.lower.as_ref(), self.upper.as_ref())
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &ValueRange) -> bool {
        let lower_ok = match (&self.lower, &other.lower) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => match mine.value.cmp(&theirs.value) {
                Ordering::Less => true,
                Ordering::Equal => mine.inclusive || !theirs.inclusive,
                Ordering::Greater => false,
            },
        };
        let upper_ok = match (&self.upper, &other.upper) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => match mine.value.cmp(&theirs.value) {
                Ordering::Greater => true,
                Ordering::Equal => mine.inclusive || !theirs.inclusive,
                Ordering::Less => false,
            },
        };
        lower_ok && upper_ok
    }

    fn tighten_lower(&mut self, candidate: RangeBound) {
        let replace = match &self.lower {
            None => true,
            Some(current) => match candidate.value.cmp(&current.value) {
                Ordering::Greater => true,
                Ordering::Equal => current.inclusive && !candidate.inclusive,
                Ordering::Less => false,
            },
        };
        if replace {
            self.lower = Some(candidate);
        }
    }

    fn tighten_upper(&mut self, candidate: RangeBound) {
        let replace = match &self.upper {
            None => true,
            Some(current) => match candidate.value.cmp(&current.value) {
                Ordering::Less => true,
                Ordering::Equal => current.inclusive && !candidate.inclusive,
                Ordering::Greater => false,
            },
        };
        if replace {
            self.upper = Some(candidate);
        }
    }
}

fn lower_reaches_upper(lower: Option<&RangeBound>, upper: Option<&RangeBound>) -> bool {
    match (lower, upper) {
        (Some(lower), Some(upper)) => match lower.value.cmp(&upper.value) {
            Ordering::Less => true,
            Ordering::Equal => lower.inclusive && upper.inclusive,
            Ordering::Greater => false,
        },
        _ => true,
    }
}

/// What data a policy covers: predicates over a single attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectCondition {
    pub attribute: String,
    pub predicates: Vec<BooleanPredicate>,
}

impl ObjectCondition {
    pub fn new(attribute: impl Into<String>, predicates: Vec<BooleanPredicate>) -> Self {
        Self {
            attribute: attribute.into(),
            predicates,
        }
    }

    /// Equality condition `attribute = value`.
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(attribute, vec![BooleanPredicate::eq(value)])
    }

    /// Closed interval condition `low <= attribute <= high`.
    pub fn between(
        attribute: impl Into<String>,
        low: impl Into<String>,
        high: impl Into<String>,
    ) -> Self {
        Self::new(
            attribute,
            vec![
                BooleanPredicate::new(Operator::Gte, low),
                BooleanPredicate::new(Operator::Lte, high),
            ],
        )
    }

    /// True when any predicate value of `self` equals any predicate value of `other`.
    pub fn shares_value_with(&self, other: &ObjectCondition) -> bool {
        self.predicates
            .iter()
            .any(|mine| other.predicates.iter().any(|theirs| mine.value == theirs.value))
    }

    /// Interval covered by this condition's predicates.
    pub fn range(&self) -> ValueRange {
        let mut range = ValueRange::default();
        for predicate in &self.predicates {
            let bound = |inclusive| RangeBound {
                value: predicate.value.clone(),
                inclusive,
            };
            match predicate.operator {
                Operator::Eq => {
                    range.tighten_lower(bound(true));
                    range.tighten_upper(bound(true));
                }
                Operator::Gt => range.tighten_lower(bound(false)),
                Operator::Gte => range.tighten_lower(bound(true)),
                Operator::Lt => range.tighten_upper(bound(false)),
                Operator::Lte => range.tighten_upper(bound(true)),
            }
        }
        range
    }
}

/// An access-control rule: which objects it covers and who it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub querier: QuerierId,
    pub action: Action,
    pub object_conditions: Vec<ObjectCondition>,
    /// Set by the policy store when the policy is committed.
    pub inserted_at: Timestamp,
}

impl Policy {
    pub fn allow(
        querier: impl Into<QuerierId>,
        object_conditions: Vec<ObjectCondition>,
        inserted_at: Timestamp,
    ) -> Self {
        Self {
            id: PolicyId::new(),
            querier: querier.into(),
            action: Action::Allow,
            object_conditions,
            inserted_at,
        }
    }

    pub fn is_allow(&self) -> bool {
        self.action == Action::Allow
    }

    /// True when the policy was inserted strictly after `since`.
    pub fn is_newer_than(&self, since: Timestamp) -> bool {
        self.inserted_at > since
    }
}
