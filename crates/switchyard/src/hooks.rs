//! Observer callbacks invoked by every transport.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use switchyard_wire::{Request, Response};

use crate::session::ConnectionInfo;

const HOOK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::hooks");

/// Connection and request lifecycle callbacks. Every method defaults to a
/// no-op.
pub trait Hook: Send + Sync {
    /// A connection, QUIC connection or WebSocket was accepted.
    fn on_connect(&self, info: &ConnectionInfo) {
        let _ = info;
    }

    /// The connection closed.
    fn on_close(&self, info: &ConnectionInfo) {
        let _ = info;
    }

    /// A request was decoded.
    fn on_request(&self, info: &ConnectionInfo, request: &Request) {
        let _ = (info, request);
    }

    /// A response was produced, whether or not it is written back.
    fn on_response(&self, info: &ConnectionInfo, response: &Response) {
        let _ = (info, response);
    }

    /// The request finished after `elapsed`.
    fn on_finish(&self, info: &ConnectionInfo, request: &Request, elapsed: Duration, code: i32) {
        let _ = (info, request, elapsed, code);
    }
}

impl<T> Hook for Arc<T>
where
    T: Hook + ?Sized,
{
    fn on_connect(&self, info: &ConnectionInfo) {
        (**self).on_connect(info);
    }

    fn on_close(&self, info: &ConnectionInfo) {
        (**self).on_close(info);
    }

    fn on_request(&self, info: &ConnectionInfo, request: &Request) {
        (**self).on_request(info, request);
    }

    fn on_response(&self, info: &ConnectionInfo, response: &Response) {
        (**self).on_response(info, response);
    }

    fn on_finish(&self, info: &ConnectionInfo, request: &Request, elapsed: Duration, code: i32) {
        (**self).on_finish(info, request, elapsed, code);
    }
}

/// Hook that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl Hook for NoopHook {}

/// Hook that records connections and finished requests at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHook;

impl Hook for LoggingHook {
    fn on_connect(&self, info: &ConnectionInfo) {
        debug!(
            target: HOOK_TARGET,
            instance = %info.instance,
            transport = %info.kind,
            peer = ?info.peer,
            "connection opened"
        );
    }

    fn on_close(&self, info: &ConnectionInfo) {
        debug!(
            target: HOOK_TARGET,
            instance = %info.instance,
            peer = ?info.peer,
            "connection closed"
        );
    }

    fn on_finish(&self, info: &ConnectionInfo, request: &Request, elapsed: Duration, code: i32) {
        debug!(
            target: HOOK_TARGET,
            instance = %info.instance,
            action = %request.action,
            version = %request.version,
            result_code = code,
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "request finished"
        );
    }
}
