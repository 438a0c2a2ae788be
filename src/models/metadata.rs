use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Attribution metadata carried inside a tracking token.
///
/// Keys are kept sorted so the serialized form is canonical.
pub type Metadata = BTreeMap<String, MetaValue>;

/// A single metadata value. Only JSON scalars are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
}

impl MetaValue {
    /// Render the value for use as a query parameter; `None` for null.
    pub fn as_param(&self) -> Option<Cow<'_, str>> {
        match self {
            MetaValue::Null => None,
            MetaValue::Bool(b) => Some(Cow::Owned(b.to_string())),
            MetaValue::Number(n) => Some(Cow::Owned(n.to_string())),
            MetaValue::Text(s) => Some(Cow::Borrowed(s.as_str())),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Number(value.into())
    }
}

impl From<u64> for MetaValue {
    fn from(value: u64) -> Self {
        MetaValue::Number(value.into())
    }
}
