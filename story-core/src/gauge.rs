//! Gauges: bounded numeric story-state metrics.
//!
//! A [`GaugeModel`] owns the gauge definitions. Gauge state is plain data
//! ([`GaugeState`]) and is only ever changed through [`GaugeModel::apply`],
//! which clamps every value into its gauge's `[min, max]`.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Per-gauge deltas, keyed by gauge name.
pub type Deltas = BTreeMap<String, i32>;

/// Errors from applying deltas.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GaugeError {
    #[error("Undefined gauge: {0}")]
    UndefinedGauge(String),
}

/// A named numeric axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gauge {
    /// Identifier used in conditions and deltas (e.g. `"trust"`).
    pub name: String,
    /// Display name.
    #[serde(default)]
    pub label: String,
    /// What the gauge measures.
    #[serde(default)]
    pub meaning: String,
    /// State described by the minimum value.
    #[serde(default)]
    pub min_label: String,
    /// State described by the maximum value.
    #[serde(default)]
    pub max_label: String,
    /// How the gauge is used in the story.
    #[serde(default)]
    pub description: String,
    pub min: i32,
    pub max: i32,
    pub initial: i32,
}

impl Gauge {
    pub fn new(name: impl Into<String>, min: i32, max: i32, initial: i32) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            meaning: String::new(),
            min_label: String::new(),
            max_label: String::new(),
            description: String::new(),
            min,
            max,
            initial,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_meaning(mut self, meaning: impl Into<String>) -> Self {
        self.meaning = meaning.into();
        self
    }

    pub fn with_extremes(mut self, min_label: impl Into<String>, max_label: impl Into<String>) -> Self {
        self.min_label = min_label.into();
        self.max_label = max_label.into();
        self
    }

    /// Clamp a value into this gauge's range.
    pub fn clamp(&self, value: i64) -> i32 {
        value.clamp(self.min as i64, self.max as i64) as i32
    }

    /// Largest single change that can still matter: `max - min`.
    pub fn span(&self) -> i64 {
        self.max as i64 - self.min as i64
    }

    /// Whether a single delta stays within `[-span, span]`.
    pub fn accepts_delta(&self, delta: i32) -> bool {
        (delta as i64).abs() <= self.span()
    }

    fn check(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidGauge {
            name: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if self.min > self.max {
            return Err(invalid(format!("min {} exceeds max {}", self.min, self.max)));
        }
        if !(self.min..=self.max).contains(&self.initial) {
            return Err(invalid(format!(
                "initial {} outside [{}, {}]",
                self.initial, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Current value of every gauge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GaugeState(BTreeMap<String, i32>);

impl GaugeState {
    /// Value of a gauge; undefined names read as 0.
    pub fn get(&self, name: &str) -> i32 {
        self.0.get(name).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn as_map(&self) -> &BTreeMap<String, i32> {
        &self.0
    }
}

/// The set of gauges for a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Gauge>", into = "Vec<Gauge>")]
pub struct GaugeModel {
    gauges: Vec<Gauge>,
}

impl GaugeModel {
    /// Create a model, rejecting empty, duplicate or malformed gauges.
    pub fn new(gauges: Vec<Gauge>) -> Result<Self, ConfigError> {
        if gauges.is_empty() {
            return Err(ConfigError::EmptyGaugeSet);
        }
        let mut seen = BTreeSet::new();
        for gauge in &gauges {
            gauge.check()?;
            if !seen.insert(gauge.name.as_str()) {
                return Err(ConfigError::DuplicateGauge(gauge.name.clone()));
            }
        }
        Ok(Self { gauges })
    }

    pub fn gauges(&self) -> &[Gauge] {
        &self.gauges
    }

    pub fn get(&self, name: &str) -> Option<&Gauge> {
        self.gauges.iter().find(|g| g.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.gauges.iter().map(|g| g.name.as_str())
    }

    /// State with every gauge at its initial value.
    pub fn initial_state(&self) -> GaugeState {
        GaugeState(
            self.gauges
                .iter()
                .map(|g| (g.name.clone(), g.initial))
                .collect(),
        )
    }

    /// Fail if any delta names an undefined gauge.
    pub fn check_deltas(&self, deltas: &Deltas) -> Result<(), GaugeError> {
        match deltas.keys().find(|name| !self.contains(name)) {
            Some(name) => Err(GaugeError::UndefinedGauge(name.clone())),
            None => Ok(()),
        }
    }

    /// Apply deltas to a state, clamping each gauge into `[min, max]`.
    ///
    /// Gauges missing from `state` start from their initial value. The input
    /// is never modified; on error no partial state is produced.
    pub fn apply(&self, state: &GaugeState, deltas: &Deltas) -> Result<GaugeState, GaugeError> {
        self.check_deltas(deltas)?;

        let mut next = state.clone();
        for gauge in &self.gauges {
            let current = state.0.get(&gauge.name).copied().unwrap_or(gauge.initial);
            let delta = deltas.get(&gauge.name).copied().unwrap_or(0);
            next.0
                .insert(gauge.name.clone(), gauge.clamp(current as i64 + delta as i64));
        }
        Ok(next)
    }
}

impl TryFrom<Vec<Gauge>> for GaugeModel {
    type Error = ConfigError;

    fn try_from(gauges: Vec<Gauge>) -> Result<Self, Self::Error> {
        Self::new(gauges)
    }
}

impl From<GaugeModel> for Vec<Gauge> {
    fn from(model: GaugeModel) -> Self {
        model.gauges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> GaugeModel {
        GaugeModel::new(vec![
            Gauge::new("trust", 0, 100, 50),
            Gauge::new("fear", 0, 100, 20),
        ])
        .unwrap()
    }

    fn deltas(pairs: &[(&str, i32)]) -> Deltas {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_apply_clamps_to_max() {
        let model = model();
        let state = model.apply(&model.initial_state(), &deltas(&[("trust", 70)])).unwrap();
        assert_eq!(state.get("trust"), 100);
        assert_eq!(state.get("fear"), 20);
    }

    #[test]
    fn test_apply_clamps_to_min() {
        let model = model();
        let state = model.apply(&model.initial_state(), &deltas(&[("fear", -500)])).unwrap();
        assert_eq!(state.get("fear"), 0);
    }

    #[test]
    fn test_apply_undefined_gauge_fails() {
        let model = model();
        let initial = model.initial_state();
        let err = model
            .apply(&initial, &deltas(&[("trust", 5), ("hope", 10)]))
            .unwrap_err();
        assert_eq!(err, GaugeError::UndefinedGauge("hope".to_string()));
    }

    #[test]
    fn test_apply_is_pure() {
        let model = model();
        let initial = model.initial_state();
        let d = deltas(&[("trust", -15)]);
        let a = model.apply(&initial, &d).unwrap();
        let b = model.apply(&initial, &d).unwrap();
        assert_eq!(a, b);
        assert_eq!(initial.get("trust"), 50);
    }

    #[test]
    fn test_chained_deltas_stay_in_range() {
        let model = model();
        let mut state = model.initial_state();
        for delta in [90, -300, 45, 45, 45, -7, 1000, -1] {
            state = model.apply(&state, &deltas(&[("trust", delta), ("fear", -delta)])).unwrap();
            for (name, value) in state.iter() {
                let gauge = model.get(name).unwrap();
                assert!((gauge.min..=gauge.max).contains(&value));
            }
        }
    }

    #[test]
    fn test_model_rejects_bad_gauges() {
        assert_eq!(GaugeModel::new(vec![]), Err(ConfigError::EmptyGaugeSet));
        assert!(matches!(
            GaugeModel::new(vec![Gauge::new("a", 10, 0, 5)]),
            Err(ConfigError::InvalidGauge { .. })
        ));
        assert!(matches!(
            GaugeModel::new(vec![Gauge::new("a", 0, 10, 11)]),
            Err(ConfigError::InvalidGauge { .. })
        ));
        assert_eq!(
            GaugeModel::new(vec![Gauge::new("a", 0, 10, 5), Gauge::new("a", 0, 10, 5)]),
            Err(ConfigError::DuplicateGauge("a".to_string()))
        );
    }

    #[test]
    fn test_model_serde_validates() {
        let json = serde_json::to_string(&model()).unwrap();
        let back: GaugeModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model());

        let bad = r#"[{"name":"x","min":5,"max":1,"initial":3}]"#;
        assert!(serde_json::from_str::<GaugeModel>(bad).is_err());
    }
}
