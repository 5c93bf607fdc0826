use crate::error::{DbKitError, Result};
use crate::types::{fold_name, Value};

/// Provider type hint attached to a parameter.
/// Drivers use it to pick the native type when the value alone is ambiguous
/// (for example a `Null` that has to be sent as `int8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Text,
    Bytes,
}

/// A single named command parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    pub type_tag: Option<ParamType>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            type_tag: None,
        }
    }

    pub fn typed(name: impl Into<String>, value: impl Into<Value>, type_tag: ParamType) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            type_tag: Some(type_tag),
        }
    }

    /// Name without its placeholder sigil, lowercased; used for uniqueness checks.
    pub fn normalized_name(&self) -> String {
        normalize(&self.name)
    }
}

fn normalize(name: &str) -> String {
    fold_name(name.trim_start_matches(['@', ':', '$']))
}

/// Ordered parameter list with unique names.
///
/// Names compare case-insensitively and ignore a leading `@`, `:` or `$`,
/// so `@Id` and `id` collide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    items: Vec<Parameter>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, rejecting empty or duplicate names.
    pub fn push(&mut self, parameter: Parameter) -> Result<()> {
        let key = parameter.normalized_name();
        if key.is_empty() {
            return Err(DbKitError::InvalidArgument(
                "parameter name must not be empty".to_string(),
            ));
        }
        if self.items.iter().any(|p| p.normalized_name() == key) {
            return Err(DbKitError::DuplicateParameter(parameter.name));
        }
        self.items.push(parameter);
        Ok(())
    }

    /// Look up a parameter by name, ignoring case and sigil.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        let key = normalize(name);
        self.items.iter().find(|p| p.normalized_name() == key)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.items.iter()
    }

    /// Parameter values in declaration order, for positional drivers.
    pub fn values(&self) -> Vec<Value> {
        self.items.iter().map(|p| p.value.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<'a> IntoIterator for &'a Parameters {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
