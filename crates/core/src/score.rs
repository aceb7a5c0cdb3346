//! Opaque grader results and their conversion into a register value.
//!
//! Conversion wraps rather than clamps: the value is turned into an
//! integer and only its low 16 bits are kept, so `65537` becomes `1` and
//! `-1` becomes `65535`.

use std::fmt;

/// Whatever the grading script returned, detached from the script engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Unit,
    /// Any other script value; carries its type name for diagnostics.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    #[error("Grader returned non-numeric text '{0}'")]
    NotNumeric(String),

    #[error("Grader returned non-finite number {0}")]
    NonFinite(f64),

    #[error("Grader returned no value")]
    Unit,

    #[error("Grader returned unsupported type '{0}'")]
    Unsupported(String),
}

impl ScoreValue {
    /// Convert to an integer and truncate to the register width.
    pub fn to_register(&self) -> Result<u16, ConversionError> {
        match self {
            Self::Int(v) => Ok(wrap(*v)),
            Self::Float(v) => float_to_register(*v),
            Self::Bool(v) => Ok(u16::from(*v)),
            Self::Text(text) => {
                let trimmed = text.trim();
                if let Ok(v) = trimmed.parse::<i64>() {
                    return Ok(wrap(v));
                }
                match trimmed.parse::<f64>() {
                    Ok(v) => float_to_register(v),
                    Err(_) => Err(ConversionError::NotNumeric(text.clone())),
                }
            }
            Self::Unit => Err(ConversionError::Unit),
            Self::Other(type_name) => Err(ConversionError::Unsupported(type_name.clone())),
        }
    }
}

impl fmt::Display for ScoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Unit => f.write_str("()"),
            Self::Other(type_name) => write!(f, "<{type_name}>"),
        }
    }
}

fn wrap(value: i64) -> u16 {
    value as u16
}

fn float_to_register(value: f64) -> Result<u16, ConversionError> {
    if !value.is_finite() {
        return Err(ConversionError::NonFinite(value));
    }
    // Truncate toward zero first; `as i64` saturates beyond its range.
    Ok(wrap(value.trunc() as i64))
}
