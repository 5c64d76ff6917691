//! Ending conditions.
//!
//! A condition is a small predicate over named counters (tag counts for
//! episode endings, gauge values for final endings):
//!
//! ```text
//! default
//! cooperative >= 2
//! trusting > doubtful
//! cooperative >= 2 AND trusting >= 1
//! doubtful >= 2 OR aggressive >= 2
//! ```
//!
//! `AND` binds loosest: `a AND b OR c` means `a AND (b OR c)`. Names that
//! are absent from the evaluated state count as 0.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Keyword for a condition that always holds.
pub const CATCH_ALL: &str = "default";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Empty condition")]
    Empty,

    #[error("No comparison operator in '{0}'")]
    MissingOperator(String),

    #[error("Invalid operand '{operand}' in '{comparison}'")]
    InvalidOperand { comparison: String, operand: String },
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Ne,
}

impl CmpOp {
    // Two-character operators first so ">=" is never read as ">".
    const PARSE_ORDER: [CmpOp; 6] = [CmpOp::Ge, CmpOp::Le, CmpOp::Eq, CmpOp::Ne, CmpOp::Gt, CmpOp::Lt];

    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }

    pub fn holds(&self, left: i64, right: i64) -> bool {
        match self {
            CmpOp::Ge => left >= right,
            CmpOp::Le => left <= right,
            CmpOp::Gt => left > right,
            CmpOp::Lt => left < right,
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Value(i64),
    Name(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(v) => write!(f, "{v}"),
            Operand::Name(n) => f.write_str(n),
        }
    }
}

/// `name op operand`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub name: String,
    pub op: CmpOp,
    pub operand: Operand,
}

impl Comparison {
    pub fn new(name: impl Into<String>, op: CmpOp, operand: Operand) -> Self {
        Self {
            name: name.into(),
            op,
            operand,
        }
    }

    fn evaluate(&self, lookup: &impl Fn(&str) -> i64) -> bool {
        let left = lookup(&self.name);
        let right = match &self.operand {
            Operand::Value(v) => *v,
            Operand::Name(n) => lookup(n),
        };
        self.op.holds(left, right)
    }

    /// Whether some pair of values inside the given ranges satisfies this
    /// comparison. Names without a range cannot be satisfied.
    fn satisfiable_within(&self, ranges: &BTreeMap<String, ValueRange>) -> bool {
        let Some(left) = ranges.get(&self.name) else {
            return false;
        };
        let right = match &self.operand {
            Operand::Value(v) => ValueRange::point(*v),
            Operand::Name(n) => match ranges.get(n) {
                Some(range) => *range,
                None => return false,
            },
        };
        match self.op {
            CmpOp::Ge => left.max >= right.min,
            CmpOp::Le => left.min <= right.max,
            CmpOp::Gt => left.max > right.min,
            CmpOp::Lt => left.min < right.max,
            CmpOp::Eq => left.min <= right.max && right.min <= left.max,
            CmpOp::Ne => !(left.is_point() && right.is_point() && left.min == right.min),
        }
    }

    fn parse(text: &str) -> Result<Self, ConditionError> {
        let text = text.trim();
        for op in CmpOp::PARSE_ORDER {
            let Some((left, right)) = text.split_once(op.symbol()) else {
                continue;
            };
            let (left, right) = (left.trim(), right.trim());
            let invalid = |operand: &str| ConditionError::InvalidOperand {
                comparison: text.to_string(),
                operand: operand.to_string(),
            };
            if !is_name(left) {
                return Err(invalid(left));
            }
            let operand = if let Ok(value) = right.parse::<i64>() {
                Operand::Value(value)
            } else if is_name(right) {
                Operand::Name(right.to_string())
            } else {
                return Err(invalid(right));
            };
            return Ok(Self::new(left, op, operand));
        }
        Err(ConditionError::MissingOperator(text.to_string()))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.op.symbol(), self.operand)
    }
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        && !s.chars().all(|c| c.is_ascii_digit())
}

/// Inclusive integer range a value may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

impl ValueRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn point(value: i64) -> Self {
        Self { min: value, max: value }
    }

    pub fn is_point(&self) -> bool {
        self.min == self.max
    }
}

/// A parsed ending condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `default`: always true.
    Always,
    /// Every group must hold; a group holds when any of its comparisons does.
    AllOf(Vec<Vec<Comparison>>),
}

impl Condition {
    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ConditionError::Empty);
        }
        if text.eq_ignore_ascii_case(CATCH_ALL) {
            return Ok(Condition::Always);
        }

        let groups = text
            .split(" AND ")
            .map(|conjunct| {
                conjunct
                    .split(" OR ")
                    .map(Comparison::parse)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Condition::AllOf(groups))
    }

    /// Convenience for a single comparison against a constant.
    pub fn compare(name: impl Into<String>, op: CmpOp, value: i64) -> Self {
        Condition::AllOf(vec![vec![Comparison::new(name, op, Operand::Value(value))]])
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, Condition::Always)
    }

    /// Evaluate against a name lookup.
    pub fn evaluate(&self, lookup: impl Fn(&str) -> i64) -> bool {
        match self {
            Condition::Always => true,
            Condition::AllOf(groups) => groups
                .iter()
                .all(|group| group.iter().any(|cmp| cmp.evaluate(&lookup))),
        }
    }

    /// Evaluate against a map of counters; missing names are 0.
    pub fn evaluate_map<V>(&self, values: &BTreeMap<String, V>) -> bool
    where
        V: Copy + Into<i64>,
    {
        self.evaluate(|name| values.get(name).map(|v| (*v).into()).unwrap_or(0))
    }

    /// Every name the condition reads, operands included.
    pub fn referenced_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        if let Condition::AllOf(groups) = self {
            for cmp in groups.iter().flatten() {
                names.insert(cmp.name.clone());
                if let Operand::Name(n) = &cmp.operand {
                    names.insert(n.clone());
                }
            }
        }
        names
    }

    /// Whether the condition can hold for some values within `ranges`.
    pub fn satisfiable_within(&self, ranges: &BTreeMap<String, ValueRange>) -> bool {
        match self {
            Condition::Always => true,
            Condition::AllOf(groups) => groups
                .iter()
                .all(|group| group.iter().any(|cmp| cmp.satisfiable_within(ranges))),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => f.write_str(CATCH_ALL),
            Condition::AllOf(groups) => {
                for (i, group) in groups.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    for (j, cmp) in group.iter().enumerate() {
                        if j > 0 {
                            f.write_str(" OR ")?;
                        }
                        write!(f, "{cmp}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::parse(s)
    }
}

impl Serialize for Condition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Condition::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_parse_and_display() {
        let c = Condition::parse("cooperative >= 2 AND trusting > doubtful").unwrap();
        assert_eq!(c.to_string(), "cooperative >= 2 AND trusting > doubtful");
        assert_eq!(Condition::parse(" default ").unwrap(), Condition::Always);
    }

    #[test]
    fn test_evaluate_simple() {
        let c = Condition::parse("hero >= 3").unwrap();
        assert!(!c.evaluate_map(&counts(&[("hero", 2)])));
        assert!(c.evaluate_map(&counts(&[("hero", 3)])));
    }

    #[test]
    fn test_missing_names_are_zero() {
        let c = Condition::parse("brave < 1").unwrap();
        assert!(c.evaluate_map(&counts(&[])));
        let c = Condition::parse("brave == fearful").unwrap();
        assert!(c.evaluate_map(&counts(&[])));
    }

    #[test]
    fn test_and_binds_loosest() {
        // a AND (b OR c)
        let c = Condition::parse("a >= 1 AND b >= 1 OR c >= 1").unwrap();
        assert!(c.evaluate_map(&counts(&[("a", 1), ("c", 1)])));
        assert!(!c.evaluate_map(&counts(&[("c", 1)])));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Condition::parse("   "), Err(ConditionError::Empty));
        assert!(matches!(
            Condition::parse("hero is big"),
            Err(ConditionError::MissingOperator(_))
        ));
        assert!(matches!(
            Condition::parse(">= 3"),
            Err(ConditionError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_referenced_names() {
        let c = Condition::parse("trust >= 60 AND fear < hope").unwrap();
        let names: Vec<_> = c.referenced_names().into_iter().collect();
        assert_eq!(names, vec!["fear", "hope", "trust"]);
        assert!(Condition::Always.referenced_names().is_empty());
    }

    #[test]
    fn test_satisfiable_within() {
        let ranges: BTreeMap<String, ValueRange> =
            [("trust".to_string(), ValueRange::new(20, 70))].into_iter().collect();

        assert!(Condition::parse("trust >= 70").unwrap().satisfiable_within(&ranges));
        assert!(!Condition::parse("trust > 70").unwrap().satisfiable_within(&ranges));
        assert!(Condition::parse("trust == 20").unwrap().satisfiable_within(&ranges));
        assert!(!Condition::parse("trust < 20").unwrap().satisfiable_within(&ranges));
        assert!(!Condition::parse("fear >= 0").unwrap().satisfiable_within(&ranges));
        assert!(Condition::parse("fear >= 0 OR trust <= 30")
            .unwrap()
            .satisfiable_within(&ranges));
    }

    #[test]
    fn test_serde_as_string() {
        let c = Condition::parse("doubtful >= 2 OR aggressive >= 2").unwrap();
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"doubtful >= 2 OR aggressive >= 2\"");
        let back: Condition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert!(serde_json::from_str::<Condition>("\"nonsense\"").is_err());
    }
}
