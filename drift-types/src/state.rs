use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::host::GenContext;
use crate::target::Target;
use crate::value::{Value, ValueType};

/// Field name to value snapshot, either a target or an observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(BTreeMap<String, Value>);

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fetches a field or fails naming it.
    pub fn require(&self, field: &str) -> Result<&Value, ValueError> {
        self.get(field).ok_or_else(|| ValueError::NoCandidate {
            constraints: format!("state field '{field}'"),
        })
    }

    /// Renders every field for `target`.
    pub fn transform(&self, target: Target) -> Result<BTreeMap<String, String>, ValueError> {
        self.0
            .iter()
            .map(|(field, value)| Ok((field.clone(), value.transform(target)?)))
            .collect()
    }

    /// Field level comparison against an observed state. Fields missing on
    /// either side count as differences.
    pub fn diff(&self, actual: &State) -> Vec<FieldDiff> {
        let mut fields: Vec<&String> = self.0.keys().chain(actual.0.keys()).collect();
        fields.sort();
        fields.dedup();
        fields
            .into_iter()
            .filter_map(|field| {
                let expected = self.get(field);
                let observed = actual.get(field);
                (expected != observed).then(|| FieldDiff {
                    field: field.clone(),
                    expected: expected.cloned(),
                    actual: observed.cloned(),
                })
            })
            .collect()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .0
            .iter()
            .map(|(field, value)| format!("{field}={value}"))
            .collect();
        write!(f, "{{{}}}", fields.join(", "))
    }
}

impl FromIterator<(String, Value)> for State {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One differing field between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |value: &Option<Value>| match value {
            Some(v) => v.repr(),
            None => "<missing>".to_string(),
        };
        write!(f, "{}: {} != {}", self.field, render(&self.expected), render(&self.actual))
    }
}

/// Ordered field schema of a wrapper.
pub struct Definition {
    fields: Vec<(&'static str, Box<dyn ValueType>)>,
}

impl Definition {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn field(mut self, name: &'static str, value_type: impl ValueType + 'static) -> Self {
        self.fields.push((name, Box::new(value_type)));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(name, _)| *name)
    }

    /// Generates every field in declaration order.
    pub fn generate(&self, ctx: &mut GenContext<'_>) -> Result<State, ValueError> {
        let mut state = State::new();
        for (name, value_type) in &self.fields {
            let value = value_type.generate(ctx)?;
            log::trace!("Generated {name} = {value}");
            state.insert(*name, value);
        }
        Ok(state)
    }
}

impl Default for Definition {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|(name, t)| (name, t.describe())))
            .finish()
    }
}
