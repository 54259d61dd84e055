//! Origin allow-list enforcement
//!
//! Browser-facing API routes carry an `Origin` header; requests from
//! origins outside the configured allow-list get a 403. Requests without
//! an `Origin` header (gateway callbacks, curl) pass through.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::{AppError, AppErrorKind};

pub async fn origin_guard(
    State(allowed_origins): State<Arc<Vec<String>>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(origin) = request
        .headers()
        .get("origin")
        .and_then(|v| v.to_str().ok())
    {
        let allowed = allowed_origins
            .iter()
            .any(|allow| allow == "*" || allow == origin);
        if !allowed {
            return AppError::new(AppErrorKind::OriginForbidden {
                origin: origin.to_string(),
            })
            .into_response();
        }
    }
    next.run(request).await
}
