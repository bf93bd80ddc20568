//! Search space definitions and parameter sweep strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One concrete assignment of every parameter in the search space.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ParameterValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A single parameter dimension: a name and its discrete candidate values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name (e.g. "lr").
    pub name: String,
    /// Candidate values, in sweep order.
    pub values: Vec<ParameterValue>,
}

impl ParameterDef {
    /// Candidate values with repeats dropped, first occurrence wins.
    pub fn distinct_values(&self) -> Vec<ParameterValue> {
        let mut out: Vec<ParameterValue> = Vec::with_capacity(self.values.len());
        for value in &self.values {
            if !out.contains(value) {
                out.push(value.clone());
            }
        }
        out
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_choice<V: Into<ParameterValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Integer range [low, high] inclusive, stepping by `step`.
    pub fn add_int_range(self, name: impl Into<String>, low: i64, high: i64, step: i64) -> Self {
        let step = step.max(1) as usize;
        self.add_choice(name, (low..=high).step_by(step))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// Total number of grid points, `None` on overflow.
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            total = total.checked_mul(param.distinct_values().len())?;
        }
        Some(total)
    }

    /// Names that appear more than once or carry no candidate values.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (idx, param) in self.parameters.iter().enumerate() {
            if param.values.is_empty() {
                problems.push(format!("parameter '{}' has no values", param.name));
            }
            if self.parameters[..idx].iter().any(|p| p.name == param.name) {
                problems.push(format!("parameter '{}' is defined twice", param.name));
            }
        }
        problems
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of parameter combinations to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet>;

    /// Number of suggestions still to come, if known.
    fn remaining(&self) -> Option<usize>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Grid search ----

/// Exhaustive grid search over discrete parameter combinations.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<ParameterSet>,
}

impl GridSearch {
    pub fn new(space: &SearchSpace) -> Self {
        Self::with_repeats(space, 1)
    }

    /// Grid enumerated `repeats` times back to back.
    pub fn with_repeats(space: &SearchSpace, repeats: usize) -> Self {
        let grid = Self::build_grid(space);
        let combos = (0..repeats.max(1)).flat_map(|_| grid.iter().cloned()).collect();
        Self { cursor: 0, combos }
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    fn build_grid(space: &SearchSpace) -> Vec<ParameterSet> {
        let axes: Vec<(&str, Vec<ParameterValue>)> = space
            .parameters
            .iter()
            .map(|param| (param.name.as_str(), param.distinct_values()))
            .collect();

        // Cartesian product, last axis varies fastest
        let mut result: Vec<ParameterSet> = vec![ParameterSet::new()];
        for (name, values) in &axes {
            let mut next = Vec::with_capacity(result.len() * values.len());
            for existing in &result {
                for value in values {
                    let mut combo = existing.clone();
                    combo.insert(name.to_string(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }

        result
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        let end = (self.cursor + count).min(self.combos.len());
        let batch = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.combos.len() - self.cursor)
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent uniform sampling of each parameter's candidate values.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
    remaining: usize,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, num_samples: usize, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
            remaining: num_samples,
        }
    }

    fn sample_one(&mut self) -> ParameterSet {
        let mut params = ParameterSet::new();
        for param in &self.space.parameters {
            if param.values.is_empty() {
                continue;
            }
            let idx = self.rng.gen_range(0..param.values.len());
            params.insert(param.name.clone(), param.values[idx].clone());
        }
        params
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        let n = count.min(self.remaining);
        self.remaining -= n;
        (0..n).map(|_| self.sample_one()).collect()
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.remaining)
    }

    fn name(&self) -> &str {
        "random"
    }
}
