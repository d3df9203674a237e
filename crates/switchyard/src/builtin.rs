//! Actions every daemon serves.
//!
//! - `sys.ping` answers `{"pong": true}`.
//! - `sys.echo` answers `{"echo": <request body>}`.
//! - `sys.forward` relays `{"group", "action", "body"}` to an upstream group
//!   through the outbound pool and answers with the downstream result.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use switchyard_config::Config;
use switchyard_wire::{Request, Version};

use crate::action::{ActionBuilder, Context, ProcessError, Processor, ReturnCode};
use crate::binding::{BindError, bind_into};
use crate::registry::{Registry, RegistryError};

/// Name of the liveness action.
pub const PING_ACTION: &str = "sys.ping";
/// Name of the echo action.
pub const ECHO_ACTION: &str = "sys.echo";
/// Name of the relay action.
pub const FORWARD_ACTION: &str = "sys.forward";

/// Result code when no outbound client is configured.
pub const UNAVAILABLE_CODE: i32 = 503;
/// Result code when the upstream call fails.
pub const BAD_GATEWAY_CODE: i32 = 502;

/// Registers the built-in actions.
///
/// # Errors
///
/// Returns a [`RegistryError`] when a built-in name is already taken.
pub fn register_builtins(config: &Config, registry: &mut Registry) -> Result<(), RegistryError> {
    let capacity = config.instance_pool_capacity;
    registry.register(ActionBuilder::new(PING_ACTION).node("pong", || Ping).build(capacity)?)?;
    registry.register(
        ActionBuilder::new(ECHO_ACTION)
            .node("echo", Echo::default)
            .build(capacity)?,
    )?;
    registry.register(
        ActionBuilder::new(FORWARD_ACTION)
            .node("forward", Forward::default)
            .build(capacity)?,
    )?;
    Ok(())
}

struct Ping;

#[async_trait]
impl Processor for Ping {
    async fn process(&mut self, ctx: &mut Context<'_>) -> Result<ReturnCode, ProcessError> {
        ctx.output_mut().set("pong", true);
        Ok(ReturnCode::OK)
    }

    fn reset(&mut self) {}
}

#[derive(Default)]
struct Echo {
    input: Value,
}

#[async_trait]
impl Processor for Echo {
    fn bind(&mut self, input: &Value) -> Result<(), BindError> {
        self.input = input.clone();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut Context<'_>) -> Result<ReturnCode, ProcessError> {
        ctx.output_mut().set("echo", std::mem::take(&mut self.input));
        Ok(ReturnCode::OK)
    }

    fn reset(&mut self) {
        self.input = Value::Null;
    }
}

#[derive(Debug, Deserialize)]
struct ForwardTarget {
    group: String,
    action: String,
    #[serde(default)]
    body: Value,
}

#[derive(Default)]
struct Forward {
    target: Option<ForwardTarget>,
}

#[async_trait]
impl Processor for Forward {
    fn bind(&mut self, input: &Value) -> Result<(), BindError> {
        self.target = Some(bind_into(input)?);
        Ok(())
    }

    async fn process(&mut self, ctx: &mut Context<'_>) -> Result<ReturnCode, ProcessError> {
        let target = self
            .target
            .take()
            .ok_or_else(|| ProcessError::internal("forward target was not bound"))?;
        let body = serde_json::to_vec(&target.body)
            .map_err(|error| ProcessError::internal(error.to_string()))?;
        let mut request = Request::new(Version::V4, target.action)
            .with_body(body)
            .with_trace_id(ctx.request().trace_id.clone());
        request.span_id = ctx.request().span_id.clone();
        request.caller_id = ctx.request().caller_id;

        let client = ctx.client().ok_or_else(|| {
            ProcessError::new(UNAVAILABLE_CODE, "no outbound pool is configured")
        })?;
        let response = client
            .call(&target.group, &request)
            .await
            .map_err(|error| ProcessError::new(BAD_GATEWAY_CODE, error.to_string()))?
            .ok_or_else(|| ProcessError::internal("upstream sent no response"))?;

        let decoded = serde_json::from_slice::<Value>(&response.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&response.body).into_owned()));
        let output = ctx.output_mut();
        output.set("upstream_code", response.result_code);
        output.set("response", decoded);
        Ok(ReturnCode::OK)
    }

    fn reset(&mut self) {
        self.target = None;
    }
}
