//! Open-ended attribute mapping carried by reference features.
//!
//! Reference layers come from heterogeneous inventories, so attribute values
//! are kept as a small variant type and category lookup always yields a key:
//! absent, null or blank values collapse to [`UNKNOWN_CATEGORY`].
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Category key used when a feature has no usable value for the requested attribute.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Joins the parts of a composite category key.
pub const COMPOSITE_SEPARATOR: &str = " / ";

/// The attribute, or ordered attributes, that name a category.
///
/// A composite key such as `["LEVEL", "BEC_ZONE"]` yields categories like
/// `"old / CWH"`. A missing part reads as `"unknown"`; a feature missing every
/// part is `"unknown"` as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryKey {
    Attribute(String),
    Composite(Vec<String>),
}

impl CategoryKey {
    /// Attribute names in key order.
    pub fn attributes(&self) -> &[String] {
        match self {
            Self::Attribute(name) => std::slice::from_ref(name),
            Self::Composite(names) => names,
        }
    }

    pub fn is_blank(&self) -> bool {
        let names = self.attributes();
        names.is_empty() || names.iter().any(|n| n.trim().is_empty())
    }
}

impl Default for CategoryKey {
    fn default() -> Self {
        Self::Attribute("category".to_string())
    }
}

impl From<&str> for CategoryKey {
    fn from(name: &str) -> Self {
        Self::Attribute(name.to_string())
    }
}

impl From<String> for CategoryKey {
    fn from(name: String) -> Self {
        Self::Attribute(name)
    }
}

impl<S: Into<String>> From<Vec<S>> for CategoryKey {
    fn from(names: Vec<S>) -> Self {
        Self::Composite(names.into_iter().map(Into::into).collect())
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Number(f64),
    Text(String),
}

impl AttributeValue {
    /// Category key for this value, or `None` when the value cannot name a category.
    ///
    /// Integral numbers render without a fractional part so that `4.0` and `4`
    /// from different loaders land in the same bucket.
    pub fn category_key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Number(n) if !n.is_finite() => None,
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Self::Number(n) => Some(n.to_string()),
            Self::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

/// Attribute name → value mapping, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Category key for `name`, falling back to [`UNKNOWN_CATEGORY`].
    pub fn category(&self, name: &str) -> String {
        self.get(name)
            .and_then(AttributeValue::category_key)
            .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string())
    }

    /// Category for a possibly composite key.
    pub fn category_for(&self, key: &CategoryKey) -> String {
        match key {
            CategoryKey::Attribute(name) => self.category(name),
            CategoryKey::Composite(names) => {
                let parts: Vec<Option<String>> = names
                    .iter()
                    .map(|n| self.get(n).and_then(AttributeValue::category_key))
                    .collect();
                if parts.iter().all(Option::is_none) {
                    return UNKNOWN_CATEGORY.to_string();
                }
                parts
                    .into_iter()
                    .map(|p| p.unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()))
                    .collect::<Vec<_>>()
                    .join(COMPOSITE_SEPARATOR)
            }
        }
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
