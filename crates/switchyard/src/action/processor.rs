use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use switchyard_wire::Request;

use crate::binding::BindError;
use crate::pool::Client;

/// Result code used when a processor fails without choosing one.
pub const INTERNAL_ERROR_CODE: i32 = 500;

/// Label a processor returns to select the next node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReturnCode(Cow<'static, str>);

impl ReturnCode {
    /// Conventional success code.
    pub const OK: Self = Self(Cow::Borrowed("OK"));

    /// Builds a code from any string.
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    /// The code as written in edge tables.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for ReturnCode {
    fn from(code: &'static str) -> Self {
        Self(Cow::Borrowed(code))
    }
}

impl From<String> for ReturnCode {
    fn from(code: String) -> Self {
        Self(Cow::Owned(code))
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Failure reported by a processor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct ProcessError {
    code: i32,
    message: String,
}

impl ProcessError {
    /// Builds an error carrying an explicit result code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Builds an error with [`INTERNAL_ERROR_CODE`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR_CODE, message)
    }

    /// Result code placed in the response envelope.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result fields accumulated by the nodes of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    fields: BTreeMap<String, Value>,
    result_code: i32,
    message: Option<String>,
}

impl Output {
    /// Builds the output reported for a failed invocation.
    #[must_use]
    pub fn failure(result_code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut output = Self {
            result_code,
            ..Self::default()
        };
        output.set("error", message.clone());
        output.message = Some(message);
        output
    }

    /// Sets a field, replacing any earlier value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Reads a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields in key order.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Sets the result code placed in the response envelope.
    pub fn set_result_code(&mut self, code: i32) {
        self.result_code = code;
    }

    /// Result code placed in the response envelope.
    #[must_use]
    pub const fn result_code(&self) -> i32 {
        self.result_code
    }

    /// Attaches a message for logs and error bodies.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// Attached message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// View of one invocation handed to each processor.
pub struct Context<'a> {
    request: &'a Request,
    output: &'a mut Output,
    client: Option<&'a Client>,
}

impl<'a> Context<'a> {
    /// Bundles the request, the shared output and the outbound client.
    pub fn new(request: &'a Request, output: &'a mut Output, client: Option<&'a Client>) -> Self {
        Self {
            request,
            output,
            client,
        }
    }

    /// Request being served.
    #[must_use]
    pub const fn request(&self) -> &Request {
        self.request
    }

    /// Output built so far.
    #[must_use]
    pub const fn output(&self) -> &Output {
        self.output
    }

    /// Mutable output.
    pub fn output_mut(&mut self) -> &mut Output {
        self.output
    }

    /// Client for calling downstream services, when upstreams are configured.
    #[must_use]
    pub const fn client(&self) -> Option<&Client> {
        self.client
    }
}

/// One step of an action graph.
///
/// An instance is exclusively owned by one request between checkout and
/// return. [`Processor::reset`] must clear every per-request field because
/// instances are reused.
#[async_trait]
pub trait Processor: Send {
    /// Copies the fields this step needs out of the bound request body.
    ///
    /// # Errors
    ///
    /// Returns a [`BindError`] when the input is unusable.
    fn bind(&mut self, input: &Value) -> Result<(), BindError> {
        let _ = input;
        Ok(())
    }

    /// Runs the step and names the edge to follow.
    async fn process(&mut self, ctx: &mut Context<'_>) -> Result<ReturnCode, ProcessError>;

    /// Clears per-request state before the instance is pooled again.
    fn reset(&mut self);
}
