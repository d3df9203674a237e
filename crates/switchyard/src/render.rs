//! Output renderers.

use bytes::Bytes;
use thiserror::Error;

use crate::action::Output;

/// Errors raised while rendering an [`Output`].
#[derive(Debug, Error)]
pub enum RenderError {
    /// Serialisation failed.
    #[error("failed to serialise output: {source}")]
    Serialise {
        /// Underlying serialiser error.
        #[from]
        source: serde_json::Error,
    },
}

/// Turns an [`Output`] into a response body.
pub trait Render: Send + Sync {
    /// MIME type of the rendered body.
    fn content_type(&self) -> &'static str;

    /// Renders the output fields.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`] when the fields cannot be serialised.
    fn render(&self, output: &Output) -> Result<Bytes, RenderError>;
}

/// Renders the output fields as a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRender;

impl Render for JsonRender {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render(&self, output: &Output) -> Result<Bytes, RenderError> {
        Ok(Bytes::from(serde_json::to_vec(output.fields())?))
    }
}
