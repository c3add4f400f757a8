use serde::{Deserialize, Serialize};

use crate::error::ThvError;

/// Validated dynamic metadata value (OAuth claim maps, provider args).
///
/// Consumers validate against their own expected shape at the boundary via
/// [`MetaValue::expect_str`] and friends instead of passing raw JSON through
/// public APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    Bool(bool),
    Num(f64),
    List(Vec<String>),
}

impl MetaValue {
    pub fn expect_str(&self, field: &str) -> Result<&str, ThvError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(ThvError::invalid_config(
                field,
                format!("expected a string, got {}", other.type_name()),
            )),
        }
    }

    pub fn expect_bool(&self, field: &str) -> Result<bool, ThvError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(ThvError::invalid_config(
                field,
                format!("expected a boolean, got {}", other.type_name()),
            )),
        }
    }

    pub fn expect_list(&self, field: &str) -> Result<&[String], ThvError> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(ThvError::invalid_config(
                field,
                format!("expected a list of strings, got {}", other.type_name()),
            )),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Bool(_) => "boolean",
            Self::Num(_) => "number",
            Self::List(_) => "list",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_round_trip() {
        let v: MetaValue = serde_json::from_str("\"realm\"").unwrap();
        assert_eq!(v, MetaValue::Str("realm".into()));
        let v: MetaValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, MetaValue::Bool(true));
        let v: MetaValue = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(v, MetaValue::List(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_expect_mismatch_reports_field() {
        let v = MetaValue::Bool(true);
        let err = v.expect_str("claims.aud").unwrap_err();
        assert!(err.to_string().contains("claims.aud"));
        assert!(err.to_string().contains("boolean"));
    }

    #[test]
    fn test_rejects_nested_objects() {
        assert!(serde_json::from_str::<MetaValue>("{\"a\":1}").is_err());
    }
}
