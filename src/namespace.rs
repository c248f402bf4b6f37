//! Values held in the session namespace, as seen from the host.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Modules bound into every fresh namespace.
pub const DEFAULT_SEED_MODULES: &[&str] = &["os", "sys", "math", "json", "io", "pathlib", "subprocess"];

/// Aliases bound on first use when their library is importable.
pub const DEFAULT_AUTO_IMPORTS: &[(&str, &str)] = &[
    ("pd", "pandas"),
    ("np", "numpy"),
    ("plt", "matplotlib.pyplot"),
    ("sns", "seaborn"),
    ("sklearn", "sklearn"),
    ("torch", "torch"),
    ("tf", "tensorflow"),
];

/// One `alias -> library` entry of the auto-import table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoImport {
    pub alias: String,
    pub module: String,
}

impl AutoImport {
    #[must_use]
    pub fn new(alias: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            module: module.into(),
        }
    }

    /// The built-in table.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        DEFAULT_AUTO_IMPORTS
            .iter()
            .map(|(alias, module)| Self::new(*alias, *module))
            .collect()
    }
}

/// A namespace value.
///
/// Scalars cross the process boundary as themselves; everything else is
/// described by its type name and `repr`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Opaque { type_name: String, repr: String },
}

impl Value {
    /// Python type name of the value.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Opaque { type_name, .. } => type_name,
        }
    }

    /// Whether the host can bind this value into the namespace.
    #[must_use]
    pub fn is_bindable(&self) -> bool {
        !matches!(self, Self::Opaque { .. })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Opaque { repr, .. } => write!(f, "{repr}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Point-in-time view of the user-visible namespace bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct NamespaceSnapshot {
    bindings: BTreeMap<String, Value>,
}

impl NamespaceSnapshot {
    #[must_use]
    pub fn new(bindings: BTreeMap<String, Value>) -> Self {
        Self { bindings }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Bound identifiers in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Whether `name` is a plain ASCII identifier.
///
/// Keywords pass this check; the interpreter rejects those when binding.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
