//! Runtime value types and value rankings.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The JSON type of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// `null`.
    Null,
    /// `true` / `false`.
    Bool,
    /// A number without fraction that fits `i64` or `u64`.
    Integer,
    /// Any other number.
    Float,
    /// A string.
    String,
    /// An array.
    Array,
    /// An object.
    Object,
}

impl ValueType {
    /// Returns the type of `value`.
    ///
    /// ```
    /// use respipe::params::ValueType;
    /// use serde_json::json;
    ///
    /// assert_eq!(ValueType::of(&json!(3)), ValueType::Integer);
    /// assert_eq!(ValueType::of(&json!(3.5)), ValueType::Float);
    /// assert_eq!(ValueType::of(&json!("3")), ValueType::String);
    /// ```
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Float,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Returns `true` if a value of type `actual` may be stored where this
    /// type is expected. Integers are accepted as floats.
    pub fn accepts(self, actual: ValueType) -> bool {
        self == actual || (self == Self::Float && actual == Self::Integer)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// Source of a parameter value, lowest first.
///
/// A value can only be overwritten by a write of the same or a higher rank.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Ranking {
    /// Default declared by the task itself.
    #[default]
    TaskDefault,
    /// Set in the pipeline definition.
    PipelineDefinition,
    /// Set in the application's properties file.
    ApplicationProperties,
    /// Set by a context provider of the host.
    ContextProvider,
    /// Set while the pipeline runs.
    Runtime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranking_order() {
        assert!(Ranking::TaskDefault < Ranking::PipelineDefinition);
        assert!(Ranking::PipelineDefinition < Ranking::ApplicationProperties);
        assert!(Ranking::ApplicationProperties < Ranking::ContextProvider);
        assert!(Ranking::ContextProvider < Ranking::Runtime);
    }

    #[test]
    fn float_accepts_integer_but_not_reverse() {
        assert!(ValueType::Float.accepts(ValueType::Integer));
        assert!(!ValueType::Integer.accepts(ValueType::Float));
        assert!(!ValueType::String.accepts(ValueType::Integer));
    }
}
