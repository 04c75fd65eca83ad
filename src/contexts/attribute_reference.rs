use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Why an attribute reference string could not be parsed.
#[derive(Clone, Debug, Hash, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("attribute reference cannot be empty")]
    Empty,
    #[error("attribute reference contains an invalid escape sequence")]
    InvalidEscapeSequence,
    #[error("attribute reference contains a double or trailing slash")]
    DoubleOrTrailingSlash,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
enum Path {
    /// A top-level attribute name used verbatim; the input did not start with '/'.
    Plain,
    /// A slash-delimited pointer into nested objects, already unescaped.
    Pointer(Vec<String>),
    Invalid(ReferenceError),
}

/// Identifies an attribute, or a value nested inside an object attribute, of a
/// [crate::Context].
///
/// Strings that do not begin with `/` name a top-level attribute literally, so `"a/b"` is the
/// attribute called `a/b`. Strings beginning with `/` are pointers: `"/address/city"` reads the
/// `city` property of the `address` object. Inside a pointer `~1` stands for `/` and `~0` for
/// `~`.
///
/// Parsing never fails outright. An invalid input produces a reference for which
/// [Reference::is_valid] is false; evaluating a clause or rollout that uses it is a malformed
/// flag condition.
///
/// ```
/// # use flag_evaluation_engine::Reference;
/// assert_eq!(Reference::new("/address/city").depth(), 2);
/// assert_eq!(Reference::new("/a~1b").component(0), Some("a/b"));
/// assert!(!Reference::new("/a//b").is_valid());
/// ```
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Reference {
    path: Path,
    input: String,
}

impl Reference {
    pub fn new<S: AsRef<str>>(value: S) -> Self {
        let input = value.as_ref().to_owned();
        let path = Self::parse(&input);
        Self { path, input }
    }

    fn parse(input: &str) -> Path {
        if input.is_empty() || input == "/" {
            return Path::Invalid(ReferenceError::Empty);
        }
        let Some(pointer) = input.strip_prefix('/') else {
            return Path::Plain;
        };

        pointer
            .split('/')
            .map(|part| {
                if part.is_empty() {
                    Err(ReferenceError::DoubleOrTrailingSlash)
                } else {
                    unescape(part)
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map_or_else(Path::Invalid, Path::Pointer)
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.path, Path::Invalid(_))
    }

    /// The parse error, if any.
    pub fn error(&self) -> Option<&ReferenceError> {
        match &self.path {
            Path::Invalid(e) => Some(e),
            _ => None,
        }
    }

    /// Number of path components; 1 for a plain name, 0 for an invalid reference.
    pub fn depth(&self) -> usize {
        match &self.path {
            Path::Plain => 1,
            Path::Pointer(components) => components.len(),
            Path::Invalid(_) => 0,
        }
    }

    pub fn component(&self, index: usize) -> Option<&str> {
        match (&self.path, index) {
            (Path::Plain, 0) => Some(&self.input),
            (Path::Pointer(components), _) => components.get(index).map(String::as_str),
            _ => None,
        }
    }

    /// True when the reference addresses the context's `kind` attribute itself.
    pub(crate) fn is_kind(&self) -> bool {
        self.depth() == 1 && self.component(0) == Some("kind")
    }

    pub fn as_str(&self) -> &str {
        &self.input
    }
}

fn unescape(part: &str) -> Result<String, ReferenceError> {
    if !part.contains('~') {
        return Ok(part.to_owned());
    }

    let mut out = String::with_capacity(part.len());
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(ReferenceError::InvalidEscapeSequence),
        }
    }
    Ok(out)
}

impl Default for Reference {
    /// The default reference is empty, and therefore invalid.
    fn default() -> Self {
        Reference::new("")
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.input)
    }
}

impl From<&str> for Reference {
    fn from(s: &str) -> Self {
        Reference::new(s)
    }
}

impl From<String> for Reference {
    fn from(s: String) -> Self {
        Reference::new(s)
    }
}

impl Serialize for Reference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.input)
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Reference::new)
    }
}
