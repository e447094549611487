// Rule parameters - named, overridable constants for each rule
// Values are numbers or numeric lists, deserialized from JSON overrides

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::rule::RuleError;

/// A single parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    List(Vec<f64>),
}

/// Parameter mapping of one rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleParams(BTreeMap<String, ParamValue>);

impl RuleParams {
    pub fn new() -> Self {
        RuleParams(BTreeMap::new())
    }

    /// Builder-style numeric parameter
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), ParamValue::Number(value));
        self
    }

    /// Builder-style list parameter
    pub fn with_list(mut self, name: &str, values: &[f64]) -> Self {
        self.0.insert(name.to_string(), ParamValue::List(values.to_vec()));
        self
    }

    pub fn set(&mut self, name: &str, value: ParamValue) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Numeric parameter, rejecting missing, list-typed and non-finite values
    pub fn number(&self, name: &str) -> Result<f64, RuleError> {
        match self.0.get(name) {
            Some(ParamValue::Number(v)) if v.is_finite() => Ok(*v),
            Some(ParamValue::Number(_)) => Err(RuleError::NonFiniteParam(name.to_string())),
            Some(ParamValue::List(_)) => Err(RuleError::WrongParamType {
                name: name.to_string(),
                expected: "number",
            }),
            None => Err(RuleError::MissingParam(name.to_string())),
        }
    }

    /// List parameter
    pub fn list(&self, name: &str) -> Result<&[f64], RuleError> {
        match self.0.get(name) {
            Some(ParamValue::List(values)) => Ok(values),
            Some(ParamValue::Number(_)) => Err(RuleError::WrongParamType {
                name: name.to_string(),
                expected: "list",
            }),
            None => Err(RuleError::MissingParam(name.to_string())),
        }
    }

    /// Overwrite values with those present in `overrides`
    pub fn merge(&mut self, overrides: &RuleParams) {
        for (name, value) in &overrides.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}
