use std::collections::HashMap;

use itertools::Itertools;
use log::warn;

use super::context::{Context, ContextError, Kind};
use crate::AttributeValue;

/// Builds a single-kind [Context].
///
/// Unless changed, the kind is "user", the context is not anonymous and it has no attributes
/// other than its key.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    kind: String,
    key: String,
    name: Option<String>,
    anonymous: bool,
    secondary: Option<String>,
    attributes: HashMap<String, AttributeValue>,
}

impl ContextBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            kind: "user".to_owned(),
            key: key.into(),
            name: None,
            anonymous: false,
            secondary: None,
            attributes: HashMap::new(),
        }
    }

    /// Sets the kind. Validity is checked by [ContextBuilder::build].
    pub fn kind(&mut self, kind: impl Into<String>) -> &mut Self {
        self.kind = kind.into();
        self
    }

    pub fn key(&mut self, key: impl Into<String>) -> &mut Self {
        self.key = key.into();
        self
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn anonymous(&mut self, anonymous: bool) -> &mut Self {
        self.anonymous = anonymous;
        self
    }

    /// Sets a secondary key, which is appended to the bucketing input of non-experiment
    /// rollouts.
    pub fn secondary(&mut self, secondary: impl Into<String>) -> &mut Self {
        self.secondary = Some(secondary.into());
        self
    }

    pub fn set_bool(&mut self, name: &str, value: bool) -> &mut Self {
        self.set_value(name, AttributeValue::Bool(value))
    }

    pub fn set_float(&mut self, name: &str, value: f64) -> &mut Self {
        self.set_value(name, AttributeValue::Number(value))
    }

    pub fn set_string(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.set_value(name, AttributeValue::String(value.into()))
    }

    /// Sets any attribute.
    ///
    /// The built-in names `kind`, `key`, `name` and `anonymous` set the corresponding property
    /// and are ignored (with a warning) when the value has the wrong type. `_meta` is ignored.
    /// Setting a custom attribute to null removes it.
    pub fn set_value(&mut self, name: &str, value: AttributeValue) -> &mut Self {
        match (name, value) {
            ("kind", AttributeValue::String(kind)) => {
                self.kind = kind;
            }
            ("key", AttributeValue::String(key)) => {
                self.key = key;
            }
            ("name", AttributeValue::String(n)) => {
                self.name = Some(n);
            }
            ("name", AttributeValue::Null) => {
                self.name = None;
            }
            ("anonymous", AttributeValue::Bool(a)) => {
                self.anonymous = a;
            }
            ("kind" | "key" | "name" | "anonymous", other) => {
                warn!("ignoring {:?} for built-in attribute '{}'", other, name);
            }
            ("" | "_meta", _) => {}
            (_, AttributeValue::Null) => {
                self.attributes.remove(name);
            }
            (_, value) => {
                self.attributes.insert(name.to_owned(), value);
            }
        }
        self
    }

    pub fn build(&self) -> Result<Context, ContextError> {
        let kind = Kind::try_from(self.kind.as_str())?;
        if self.key.is_empty() {
            return Err(ContextError::EmptyKey);
        }

        Ok(Context {
            kind,
            key: self.key.clone(),
            name: self.name.clone(),
            anonymous: self.anonymous,
            attributes: self.attributes.clone(),
            secondary: self.secondary.clone(),
            contexts: Vec::new(),
        })
    }
}

/// Combines several single-kind contexts into one multi-context.
#[derive(Clone, Debug, Default)]
pub struct MultiContextBuilder {
    contexts: Vec<Context>,
}

impl MultiContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a context. Adding a multi-context adds each of its parts.
    pub fn add_context(&mut self, context: Context) -> &mut Self {
        if context.is_multi() {
            self.contexts.extend(context.contexts);
        } else {
            self.contexts.push(context);
        }
        self
    }

    /// Builds the multi-context. A single added context is returned as is; no contexts or a
    /// repeated kind is an error.
    pub fn build(&self) -> Result<Context, ContextError> {
        if let Some(kind) = self.contexts.iter().map(Context::kind).duplicates().next() {
            return Err(ContextError::DuplicateKind(kind.to_string()));
        }

        match self.contexts.as_slice() {
            [] => Err(ContextError::EmptyMultiContext),
            [single] => Ok(single.clone()),
            many => Ok(Context {
                kind: Kind::multi(),
                key: String::new(),
                name: None,
                anonymous: false,
                attributes: HashMap::new(),
                secondary: None,
                contexts: many
                    .iter()
                    .cloned()
                    .sorted_by(|a, b| a.kind.cmp(&b.kind))
                    .collect(),
            }),
        }
    }
}
