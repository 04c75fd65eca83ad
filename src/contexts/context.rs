use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use log::warn;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::attribute_reference::Reference;
use super::context_builder::{ContextBuilder, MultiContextBuilder};
use crate::AttributeValue;

/// Reasons a [Context] or [Kind] could not be constructed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context kind cannot be empty")]
    EmptyKind,
    #[error("context kind cannot be '{0}'")]
    ReservedKind(String),
    #[error("context kind '{0}' contains disallowed characters")]
    InvalidKindCharacters(String),
    #[error("context key cannot be empty")]
    EmptyKey,
    #[error("multi-context must contain at least one context")]
    EmptyMultiContext,
    #[error("multi-context contains kind '{0}' more than once")]
    DuplicateKind(String),
    #[error("invalid context JSON: {0}")]
    InvalidJson(String),
}

/// The type of entity a [Context] describes, such as "user", "device" or "org".
///
/// A kind is non-empty, made of ASCII letters, digits, `.`, `_` and `-`, and is neither
/// `kind` nor `multi`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Kind(Cow<'static, str>);

impl Kind {
    pub fn user() -> Self {
        Kind(Cow::Borrowed("user"))
    }

    pub(crate) fn multi() -> Self {
        Kind(Cow::Borrowed("multi"))
    }

    pub fn is_user(&self) -> bool {
        self.0 == "user"
    }

    pub fn is_multi(&self) -> bool {
        self.0 == "multi"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Kind {
    fn default() -> Self {
        Kind::user()
    }
}

impl TryFrom<&str> for Kind {
    type Error = ContextError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "" => Err(ContextError::EmptyKind),
            "kind" | "multi" => Err(ContextError::ReservedKind(value.to_owned())),
            "user" => Ok(Kind::user()),
            k if !k
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) =>
            {
                Err(ContextError::InvalidKindCharacters(value.to_owned()))
            }
            _ => Ok(Kind(Cow::Owned(value.to_owned()))),
        }
    }
}

impl TryFrom<String> for Kind {
    type Error = ContextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Kind::try_from(value.as_str())
    }
}

impl AsRef<str> for Kind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for Kind {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Kind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Kind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Kind::try_from(s).map_err(D::Error::custom)
    }
}

/// The entity a flag is evaluated for: a single kind (a user, a device, ...) or a
/// multi-context combining several kinds.
///
/// Contexts are immutable once built; use [ContextBuilder] or [MultiContextBuilder], or
/// deserialize one from its JSON representation.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    pub(super) kind: Kind,
    pub(super) key: String,
    pub(super) name: Option<String>,
    pub(super) anonymous: bool,
    pub(super) attributes: HashMap<String, AttributeValue>,
    // Only reachable from legacy data; appended to bucketing input when present.
    pub(super) secondary: Option<String>,
    // Populated for multi-contexts only, sorted by kind.
    pub(super) contexts: Vec<Context>,
}

impl Context {
    pub fn is_multi(&self) -> bool {
        self.kind.is_multi()
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// The context key. Empty for a multi-context; see [Context::key_for_kind].
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Every kind this context carries.
    pub fn kinds(&self) -> Vec<&Kind> {
        if self.is_multi() {
            self.contexts.iter().map(Context::kind).collect()
        } else {
            vec![&self.kind]
        }
    }

    /// The single-kind context for `kind`, if this context has it.
    pub fn as_kind(&self, kind: &Kind) -> Option<&Context> {
        if self.is_multi() {
            self.contexts.iter().find(|c| &c.kind == kind)
        } else {
            (&self.kind == kind).then_some(self)
        }
    }

    pub fn key_for_kind(&self, kind: &Kind) -> Option<&str> {
        self.as_kind(kind).map(Context::key)
    }

    pub fn secondary(&self, kind: &Kind) -> Option<&str> {
        self.as_kind(kind).and_then(|c| c.secondary.as_deref())
    }

    /// Resolves `reference` against the constituent context of the given kind.
    pub fn value_for_kind(&self, reference: &Reference, kind: &Kind) -> Option<AttributeValue> {
        self.as_kind(kind)?.get_value(reference)
    }

    /// Resolves `reference` against this context.
    ///
    /// A multi-context only exposes `kind`; inspect its parts through [Context::as_kind].
    pub fn get_value(&self, reference: &Reference) -> Option<AttributeValue> {
        let first = reference.component(0)?;

        if self.is_multi() {
            if reference.is_kind() {
                return Some(AttributeValue::String(self.kind.to_string()));
            }
            warn!("multi-contexts only support retrieving the 'kind' attribute");
            return None;
        }

        if reference.depth() == 1 {
            return self.top_level_attribute(first);
        }

        // built-in attributes are scalars, so nothing is nested below them
        if matches!(first, "kind" | "key" | "name" | "anonymous") {
            return None;
        }
        let mut value = self.attributes.get(first)?;
        for depth in 1..reference.depth() {
            let name = reference.component(depth)?;
            value = match value {
                AttributeValue::Object(map) => map.get(name)?,
                _ => return None,
            };
        }
        Some(value.clone())
    }

    fn top_level_attribute(&self, name: &str) -> Option<AttributeValue> {
        match name {
            "kind" => Some(AttributeValue::String(self.kind.to_string())),
            "key" => Some(AttributeValue::String(self.key.clone())),
            "name" => self.name.clone().map(AttributeValue::String),
            "anonymous" => Some(AttributeValue::Bool(self.anonymous)),
            _ => self.attributes.get(name).cloned(),
        }
    }
}

impl TryFrom<Value> for Context {
    type Error = ContextError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err(ContextError::InvalidJson("expected an object".into()));
        };

        match map.remove("kind") {
            Some(Value::String(kind)) if kind == "multi" => {
                let mut builder = MultiContextBuilder::new();
                for (kind, body) in map {
                    let Value::Object(body) = body else {
                        return Err(ContextError::InvalidJson(format!(
                            "context for kind '{}' is not an object",
                            kind
                        )));
                    };
                    builder.add_context(single_from_json(kind, body)?);
                }
                builder.build()
            }
            Some(Value::String(kind)) => single_from_json(kind, map),
            Some(_) => Err(ContextError::InvalidJson("kind must be a string".into())),
            None => Err(ContextError::InvalidJson("missing kind".into())),
        }
    }
}

fn single_from_json(kind: String, mut body: Map<String, Value>) -> Result<Context, ContextError> {
    let key = match body.remove("key") {
        Some(Value::String(key)) => key,
        _ => return Err(ContextError::InvalidJson("key must be a string".into())),
    };

    let mut builder = ContextBuilder::new(key);
    builder.kind(kind);

    if let Some(Value::Object(mut meta)) = body.remove("_meta") {
        if let Some(Value::String(secondary)) = meta.remove("secondary") {
            builder.secondary(secondary);
        }
    }
    for (name, value) in body {
        builder.set_value(&name, AttributeValue::from(value));
    }

    builder.build()
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Context::try_from(value).map_err(D::Error::custom)
    }
}
