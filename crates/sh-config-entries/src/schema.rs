//! Form schemas
//!
//! A [`Schema`] lists the fields a flow step accepts. Each field carries a
//! [`Selector`] that both describes the form control and coerces raw input
//! into the stored value.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Per-field validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldError {
    #[error("value is required")]
    Required,
    #[error("unknown field")]
    ExtraKey,
    #[error("expected a number")]
    InvalidNumber,
    #[error("value is out of range")]
    OutOfRange,
    #[error("expected a date in YYYY-MM-DD form")]
    InvalidDate,
    #[error("value is not one of the allowed options")]
    InvalidOption,
    #[error("expected text")]
    InvalidString,
}

impl FieldError {
    /// Error code returned to forms
    pub fn code(&self) -> &'static str {
        match self {
            FieldError::Required => "required",
            FieldError::ExtraKey => "extra_key",
            FieldError::InvalidNumber => "invalid_number",
            FieldError::OutOfRange => "out_of_range",
            FieldError::InvalidDate => "invalid_date",
            FieldError::InvalidOption => "invalid_option",
            FieldError::InvalidString => "invalid_string",
        }
    }
}

/// Errors keyed by field name, sorted for stable messages
pub type FieldErrors = BTreeMap<String, FieldError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberMode {
    Box,
    Slider,
}

/// Form control and coercion rule for one field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Text {
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        multiline: bool,
    },
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
        mode: NumberMode,
    },
    Date {},
    Select { options: Vec<String> },
}

impl Selector {
    pub fn text() -> Self {
        Selector::Text { multiline: false }
    }

    pub fn multiline() -> Self {
        Selector::Text { multiline: true }
    }

    pub fn date() -> Self {
        Selector::Date {}
    }

    pub fn number_box(min: Option<f64>, max: Option<f64>, step: Option<f64>) -> Self {
        Selector::Number {
            min,
            max,
            step,
            mode: NumberMode::Box,
        }
    }

    pub fn select<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selector::Select {
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the value would be treated as not provided
    fn is_blank(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Coerce raw input into the value that gets stored
    pub fn coerce(&self, value: &Value) -> Result<Value, FieldError> {
        match self {
            Selector::Text { .. } => match value {
                Value::String(s) => Ok(Value::String(s.clone())),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(FieldError::InvalidString),
            },
            Selector::Number { min, max, step, .. } => {
                let n = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .filter(|n| n.is_finite())
                .ok_or(FieldError::InvalidNumber)?;

                if min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max) {
                    return Err(FieldError::OutOfRange);
                }

                // A whole step (or none) means the field holds an integer
                if step.map_or(true, |s| s.fract() == 0.0) {
                    if n.fract() != 0.0 {
                        return Err(FieldError::InvalidNumber);
                    }
                    Ok(Value::from(n as i64))
                } else {
                    serde_json::Number::from_f64(n)
                        .map(Value::Number)
                        .ok_or(FieldError::InvalidNumber)
                }
            }
            Selector::Date {} => value
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .ok_or(FieldError::InvalidDate),
            Selector::Select { options } => value
                .as_str()
                .filter(|s| options.iter().any(|o| o == s))
                .map(|s| Value::String(s.to_string()))
                .ok_or(FieldError::InvalidOption),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaField {
    pub key: String,
    pub required: bool,
    /// Filled in when the field is omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub selector: Selector,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    fields: Vec<SchemaField>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, key: impl Into<String>, selector: Selector) -> Self {
        self.fields.push(SchemaField {
            key: key.into(),
            required: true,
            default: None,
            selector,
        });
        self
    }

    pub fn optional(mut self, key: impl Into<String>, selector: Selector) -> Self {
        self.fields.push(SchemaField {
            key: key.into(),
            required: false,
            default: None,
            selector,
        });
        self
    }

    pub fn optional_with_default(
        mut self,
        key: impl Into<String>,
        default: Value,
        selector: Selector,
    ) -> Self {
        self.fields.push(SchemaField {
            key: key.into(),
            required: false,
            default: Some(default),
            selector,
        });
        self
    }

    /// Append another schema's fields
    pub fn extend(mut self, other: Schema) -> Self {
        self.fields.extend(other.fields);
        self
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Validate a complete submission
    ///
    /// Blank optional values are dropped, then defaults are filled in for
    /// anything still missing.
    pub fn validate(&self, input: &Map<String, Value>) -> Result<HashMap<String, Value>, FieldErrors> {
        let (mut output, mut errors) = self.coerce_present(input, false);

        for field in &self.fields {
            if output.contains_key(&field.key) || errors.contains_key(&field.key) {
                continue;
            }
            if field.required {
                errors.insert(field.key.clone(), FieldError::Required);
            } else if let Some(default) = &field.default {
                output.insert(field.key.clone(), default.clone());
            }
        }

        if errors.is_empty() {
            Ok(output)
        } else {
            Err(errors)
        }
    }

    /// Validate a patch: only the provided keys are checked, nothing is filled in
    ///
    /// A blank value comes back as `null`, which marks the field as cleared.
    pub fn validate_partial(
        &self,
        input: &Map<String, Value>,
    ) -> Result<HashMap<String, Value>, FieldErrors> {
        let (output, errors) = self.coerce_present(input, true);
        if errors.is_empty() {
            Ok(output)
        } else {
            Err(errors)
        }
    }

    fn coerce_present(
        &self,
        input: &Map<String, Value>,
        keep_blank: bool,
    ) -> (HashMap<String, Value>, FieldErrors) {
        let mut output = HashMap::new();
        let mut errors = FieldErrors::new();

        for (key, value) in input {
            let Some(field) = self.field(key) else {
                errors.insert(key.clone(), FieldError::ExtraKey);
                continue;
            };
            if Selector::is_blank(value) {
                if keep_blank && !field.required {
                    output.insert(key.clone(), Value::Null);
                }
                continue;
            }
            match field.selector.coerce(value) {
                Ok(coerced) => {
                    output.insert(key.clone(), coerced);
                }
                Err(err) => {
                    errors.insert(key.clone(), err);
                }
            }
        }

        (output, errors)
    }
}

/// Render field errors as `field: message; field: message`
pub fn describe_errors(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(key, err)| format!("{}: {}", key, err))
        .collect::<Vec<_>>()
        .join("; ")
}
