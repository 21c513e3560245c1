//! Trace Context - Request correlation and structured logging
//!
//! Generates unique trace IDs and provides structured spans for request tracing.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, info_span, Span};

/// Global request counter for trace ID generation
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a short, unique trace ID for this request
/// Format: 6 hex characters (e.g., "a1b2c3")
pub fn generate_trace_id() -> String {
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    // Mix counter and timestamp for uniqueness
    let mixed = counter.wrapping_add(timestamp);
    format!("{:06x}", mixed & 0xFFFFFF)
}

/// Trace context for a single request
#[derive(Debug, Clone)]
pub struct TraceContext {
    /// Unique trace ID (6 hex chars)
    pub trace_id: String,
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Request path (e.g., /api/oauth/initiate)
    pub path: String,
    /// Authenticated user email, once known
    pub user: Option<String>,
    /// Request start time
    pub started_at: std::time::Instant,
}

impl TraceContext {
    /// Create a new trace context for an incoming request
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            trace_id: generate_trace_id(),
            method: method.to_string(),
            path: path.to_string(),
            user: None,
            started_at: std::time::Instant::now(),
        }
    }

    /// Set user context after auth
    pub fn with_user(mut self, user: String) -> Self {
        self.user = Some(user);
        self
    }

    /// Get elapsed time since request started
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Short user label for logging (truncated email or "anon")
    pub fn short_user(&self) -> &str {
        match self.user.as_deref() {
            Some(u) => {
                // Cut at 24 bytes, backing up to a char boundary.
                let mut end = u.len().min(24);
                while !u.is_char_boundary(end) {
                    end -= 1;
                }
                &u[..end]
            }
            None => "anon",
        }
    }
}

/// Request span builder for structured logging
pub struct RequestSpan;

impl RequestSpan {
    /// Create a tracing span for an incoming request
    ///
    /// This span will automatically include trace_id in all child logs.
    pub fn enter(ctx: &TraceContext) -> Span {
        info_span!(
            "request",
            trace_id = %ctx.trace_id,
            method = %ctx.method,
            path = %ctx.path,
        )
    }

    /// Log request entry (single consolidated line)
    pub fn log_entry(ctx: &TraceContext) {
        info!(
            trace_id = %ctx.trace_id,
            "→ {} {}",
            ctx.method,
            ctx.path
        );
    }

    /// Log request completion (single consolidated line)
    pub fn log_exit(ctx: &TraceContext, status: u16, detail: Option<&str>) {
        let elapsed = ctx.elapsed_ms();

        match detail {
            Some(d) => info!(
                trace_id = %ctx.trace_id,
                user = %ctx.short_user(),
                "← {} {} ({}ms)",
                status,
                d,
                elapsed
            ),
            None => info!(
                trace_id = %ctx.trace_id,
                user = %ctx.short_user(),
                "← {} ({}ms)",
                status,
                elapsed
            ),
        }
    }
}
