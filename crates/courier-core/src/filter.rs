//! Content filters: flat, exact, conjunctive equality.
//!
//! A filter is a JSON object of `field -> required value`. Content matches
//! when every filter field is present with a strictly equal value (same JSON
//! type and value). The empty filter matches everything, including content
//! that is not an object. Evaluation never fails.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{BrokerError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a filter from the `content.filter` value of a SUBSCRIBE.
    ///
    /// Absent or `null` means "match everything"; anything other than an
    /// object is rejected.
    pub fn from_value(value: Option<&Value>) -> Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(Self::empty()),
            Some(Value::Object(fields)) => Ok(Self(fields.clone())),
            Some(other) => Err(BrokerError::malformed(format!(
                "filter must be an object, got {}",
                json_type_name(other)
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn matches(&self, content: &Value) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let Some(fields) = content.as_object() else {
            return false;
        };
        self.0
            .iter()
            .all(|(key, required)| fields.get(key) == Some(required))
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
