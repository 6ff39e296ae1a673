use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// The value of a named model option, as used by searches and job files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    StrList(Vec<String>),
}

impl ParamValue {
    pub(crate) fn as_bool(&self, option: &str) -> Result<bool, SessionError> {
        match self {
            ParamValue::Bool(b) => Ok(*b),
            other => Err(mistyped(option, "a boolean", other)),
        }
    }

    pub(crate) fn as_f64(&self, option: &str) -> Result<f64, SessionError> {
        match self {
            ParamValue::Float(v) => Ok(*v),
            ParamValue::Int(v) => Ok(*v as f64),
            other => Err(mistyped(option, "a number", other)),
        }
    }

    pub(crate) fn as_usize(&self, option: &str) -> Result<usize, SessionError> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Ok(*v as usize),
            other => Err(mistyped(option, "a non negative integer", other)),
        }
    }

    pub(crate) fn as_u64(&self, option: &str) -> Result<u64, SessionError> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Ok(*v as u64),
            other => Err(mistyped(option, "a non negative integer", other)),
        }
    }

    pub(crate) fn as_str(&self, option: &str) -> Result<&str, SessionError> {
        match self {
            ParamValue::Str(s) => Ok(s),
            other => Err(mistyped(option, "a string", other)),
        }
    }

    pub(crate) fn as_usize_list(&self, option: &str) -> Result<Vec<usize>, SessionError> {
        match self {
            ParamValue::IntList(values) if values.iter().all(|v| *v >= 0) => {
                Ok(values.iter().map(|v| *v as usize).collect())
            }
            other => Err(mistyped(option, "a list of non negative integers", other)),
        }
    }

    pub(crate) fn as_f64_list(&self, option: &str) -> Result<Vec<f64>, SessionError> {
        match self {
            ParamValue::FloatList(values) => Ok(values.clone()),
            ParamValue::IntList(values) => Ok(values.iter().map(|v| *v as f64).collect()),
            other => Err(mistyped(option, "a list of numbers", other)),
        }
    }

    pub(crate) fn as_str_list(&self, option: &str) -> Result<Vec<String>, SessionError> {
        match self {
            ParamValue::StrList(values) => Ok(values.clone()),
            other => Err(mistyped(option, "a list of strings", other)),
        }
    }
}

fn mistyped(option: &str, expected: &str, got: &ParamValue) -> SessionError {
    SessionError::Validation(format!("option '{option}' expects {expected}, got {got}"))
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{v}")?;
    }
    f.write_str("]")
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::IntList(values) => write_list(f, values),
            ParamValue::FloatList(values) => write_list(f, values),
            ParamValue::StrList(values) => write_list(f, values),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(value: Vec<i64>) -> Self {
        Self::IntList(value)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(value: Vec<f64>) -> Self {
        Self::FloatList(value)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(value: Vec<&str>) -> Self {
        Self::StrList(value.into_iter().map(String::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_values_pick_the_narrowest_variant() {
        let values: Vec<ParamValue> =
            serde_json::from_str(r#"[true, 3, 0.5, "Tanh", [10, 10], [0.1, 0.2], ["a", "b"]]"#).unwrap();

        assert_eq!(
            values,
            vec![
                ParamValue::Bool(true),
                ParamValue::Int(3),
                ParamValue::Float(0.5),
                ParamValue::Str("Tanh".into()),
                ParamValue::IntList(vec![10, 10]),
                ParamValue::FloatList(vec![0.1, 0.2]),
                ParamValue::StrList(vec!["a".into(), "b".into()]),
            ]
        );
    }

    #[test]
    fn ints_widen_to_floats() {
        assert_eq!(ParamValue::Int(2).as_f64("epochs").unwrap(), 2.0);
        assert!(ParamValue::Float(2.5).as_usize("nfolds").is_err());
    }

    #[test]
    fn lists_display_like_json() {
        assert_eq!(ParamValue::IntList(vec![50, 50]).to_string(), "[50, 50]");
    }
}
