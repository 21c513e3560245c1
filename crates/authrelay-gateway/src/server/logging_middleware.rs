//! HTTP Request/Response Logging Middleware
//!
//! Centralized logging with trace IDs for request correlation.
//! Observe-only: never alters flow outcomes, only records them.

use axum::{body::Body, extract::Request, http::StatusCode, middleware::Next, response::Response};
use http_body_util::BodyExt;
use tracing::{debug, warn, Instrument};

use crate::auth::AuthenticatedUser;
use crate::logging::{RequestSpan, TraceContext};

/// Maximum body size to log (64KB); auth payloads are small.
const MAX_BODY_LOG_SIZE: usize = 64 * 1024;

/// Paths whose bodies carry credentials or tokens and must be redacted.
const SENSITIVE_PATHS: &[&str] = &[
    "/api/oauth/exchange",
    "/api/auth/refresh",
    "/api/auth/local-login",
    "/api/auth/apple-native",
];

/// Paths that should skip body logging (provider redirects, form posts)
const SKIP_BODY_PATHS: &[&str] = &["/login/oauth2/code"];

/// Headers that should be redacted
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Check if a path contains sensitive data
pub fn is_sensitive_path(path: &str) -> bool {
    SENSITIVE_PATHS.iter().any(|p| path.contains(p))
}

/// Check if a path should skip body logging
fn should_skip_body(path: &str) -> bool {
    SKIP_BODY_PATHS.iter().any(|p| path.contains(p))
}

/// Redact sensitive headers (compact format for DEBUG)
fn redact_headers_compact(headers: &axum::http::HeaderMap) -> String {
    headers
        .iter()
        .filter(|(name, _)| {
            // Only include headers that matter for auth debugging
            let n = name.as_str().to_lowercase();
            matches!(
                n.as_str(),
                "content-type" | "accept" | "user-agent" | "authorization" | "cookie"
            )
        })
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                format!("{}=[REDACTED]", name)
            } else {
                format!("{}={:?}", name, value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format bytes as string - compact version
pub fn format_body(bytes: &[u8], redact: bool) -> String {
    if redact {
        return "[REDACTED]".to_string();
    }

    if bytes.is_empty() {
        return "[empty]".to_string();
    }

    if bytes.len() > MAX_BODY_LOG_SIZE {
        return format!("[{} bytes]", bytes.len());
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
                return serde_json::to_string(&json).unwrap_or_else(|_| text.to_string());
            }
            if text.len() > 200 {
                format!("{}...", &text[..200])
            } else {
                text.to_string()
            }
        }
        Err(_) => format!("[binary: {} bytes]", bytes.len()),
    }
}

/// Logging middleware for requests and responses
///
/// Generates a trace_id and logs a single entry/exit line per request.
pub async fn http_logging_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let method = request.method().to_string();
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let headers = request.headers().clone();
    let is_sensitive = is_sensitive_path(&path);

    let ctx = TraceContext::new(&method, &path);
    let span = RequestSpan::enter(&ctx);

    async move {
        RequestSpan::log_entry(&ctx);

        debug!(
            trace_id = %ctx.trace_id,
            headers = %redact_headers_compact(&headers),
            "Request headers"
        );

        // Buffer the request body so it can be logged and replayed
        let (parts, body) = request.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(trace_id = %ctx.trace_id, "Failed to read request body: {}", e);
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        if !should_skip_body(&path) && !body_bytes.is_empty() {
            debug!(
                trace_id = %ctx.trace_id,
                body = %format_body(&body_bytes, is_sensitive),
                "Request body"
            );
        }

        let request = Request::from_parts(parts, Body::from(body_bytes));
        let response = next.run(request).await;

        let (parts, body) = response.into_parts();
        let status = parts.status;

        // The auth middleware tags the response with the user it
        // resolved; fold that into the exit line.
        let ctx = match parts.extensions.get::<AuthenticatedUser>() {
            Some(user) => ctx.with_user(user.email.clone()),
            None => ctx,
        };

        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(trace_id = %ctx.trace_id, "Failed to read response body: {}", e);
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        // Log response body only if small enough; token responses stay
        // redacted.
        if !should_skip_body(&path) && !body_bytes.is_empty() && body_bytes.len() < 1000 {
            debug!(
                trace_id = %ctx.trace_id,
                body = %format_body(&body_bytes, is_sensitive),
                "Response body"
            );
        }

        RequestSpan::log_exit(&ctx, status.as_u16(), None);

        let response = Response::from_parts(parts, Body::from(body_bytes));
        Ok(response)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_sensitive_path() {
        assert!(is_sensitive_path("/api/oauth/exchange"));
        assert!(is_sensitive_path("/api/auth/refresh"));
        assert!(is_sensitive_path("/api/auth/local-login"));
        assert!(!is_sensitive_path("/api/oauth/initiate"));
        assert!(!is_sensitive_path("/health"));
    }

    #[test]
    fn test_skip_body_for_provider_callbacks() {
        assert!(should_skip_body("/login/oauth2/code/google"));
        assert!(!should_skip_body("/api/oauth/initiate"));
    }

    #[test]
    fn test_format_body() {
        // Empty
        assert_eq!(format_body(&[], false), "[empty]");

        // JSON is compacted
        let json = br#"{"provider": "google"}"#;
        assert_eq!(format_body(json, false), r#"{"provider":"google"}"#);

        // Redacted
        assert!(format_body(json, true).contains("REDACTED"));

        // Binary
        let binary = &[0x00, 0x01, 0xFF];
        assert!(format_body(binary, false).contains("binary"));
    }

    #[test]
    fn test_redact_headers() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        headers.insert("content-type", "application/json".parse().unwrap());

        let formatted = redact_headers_compact(&headers);
        assert!(formatted.contains("authorization=[REDACTED]"));
        assert!(!formatted.contains("Bearer secret"));
        assert!(formatted.contains("content-type"));
    }
}
