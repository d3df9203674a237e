//! Request body binders.
//!
//! A binder turns the opaque request body into a JSON value once per request.
//! Every node of the action graph then picks the fields it needs out of that
//! value in [`Processor::bind`](crate::action::Processor::bind), usually via
//! [`bind_into`].

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Content type handled by [`FormBinder`].
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Errors raised while binding a request body.
#[derive(Debug, Error)]
pub enum BindError {
    /// The body was not valid JSON.
    #[error("request body is not valid JSON: {source}")]
    Json {
        /// Underlying parser error.
        #[source]
        source: serde_json::Error,
    },
    /// The bound value did not match the processor's input type.
    #[error("request fields do not match the expected shape: {source}")]
    Shape {
        /// Underlying deserialisation error.
        #[source]
        source: serde_json::Error,
    },
    /// A processor rejected a field value.
    #[error("invalid field '{field}': {reason}")]
    Field {
        /// Offending field.
        field: String,
        /// Human-readable reason.
        reason: String,
    },
}

impl BindError {
    /// Builds a [`BindError::Field`].
    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Decodes a request body into a JSON value.
pub trait Binder: Send + Sync {
    /// Parses `body`. An empty body binds to an empty object.
    ///
    /// # Errors
    ///
    /// Returns a [`BindError`] when the body cannot be parsed.
    fn bind(&self, body: &[u8]) -> Result<Value, BindError>;
}

/// Binder for JSON bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonBinder;

impl Binder for JsonBinder {
    fn bind(&self, body: &[u8]) -> Result<Value, BindError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_slice(body).map_err(|source| BindError::Json { source })
    }
}

/// Binder for `application/x-www-form-urlencoded` bodies and query strings.
///
/// Every value binds as a string; a repeated key binds as an array.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormBinder;

impl Binder for FormBinder {
    fn bind(&self, body: &[u8]) -> Result<Value, BindError> {
        let mut fields = Map::new();
        for (key, value) in url::form_urlencoded::parse(body) {
            let value = Value::String(value.into_owned());
            match fields.get_mut(key.as_ref()) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    fields.insert(key.into_owned(), value);
                }
            }
        }
        Ok(Value::Object(fields))
    }
}

/// Picks the binder matching an HTTP `Content-Type`.
#[must_use]
pub fn binder_for_content_type(content_type: Option<&str>) -> &'static dyn Binder {
    let is_form = content_type
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE));
    if is_form { &FormBinder } else { &JsonBinder }
}

/// Deserialises a bound value into a typed input.
///
/// # Errors
///
/// Returns [`BindError::Shape`] when the value does not fit `T`.
pub fn bind_into<T: DeserializeOwned>(input: &Value) -> Result<T, BindError> {
    T::deserialize(input).map_err(|source| BindError::Shape { source })
}
