//! Logging infrastructure for the gateway
//!
//! Provides trace context and structured logging utilities.

mod trace_context;

pub use trace_context::{generate_trace_id, RequestSpan, TraceContext};
