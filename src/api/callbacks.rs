//! Inbound payment-gateway callback endpoint
//!
//! Verification order is fixed: signature first, then the replay guard,
//! then payload decoding, then reconciliation. Failures after the request
//! is authenticated are soft-fails: the gateway gets HTTP 200 with an
//! internal result code so it stops retrying, and the audit log keeps the
//! evidence. Only authentication-class failures (signature, replay) return
//! error statuses.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{error, warn};

use crate::error::{AppError, AppErrorKind};
use crate::gateway::replay::ReplayGuard;
use crate::gateway::signature::{SignatureOutcome, SignaturePolicy};
use crate::gateway::types::{decode_stk_callback, CallbackAck, GatewayName};
use crate::middleware::error::{get_request_id_from_headers, json_error_response};
use crate::services::reconciler::{PaymentReconciler, ReconcileInput, ReconcileOutcome};

pub const SIGNATURE_HEADER: &str = "x-pambo-signature";
pub const SIGNATURE_HEADER_FALLBACK: &str = "x-callback-signature";
pub const TIMESTAMP_HEADER: &str = "x-callback-timestamp";
pub const NONCE_HEADER: &str = "x-callback-nonce";

#[derive(Clone)]
pub struct CallbackState {
    pub reconciler: Arc<PaymentReconciler>,
    pub replay_guard: Arc<ReplayGuard>,
    pub signature: SignaturePolicy,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /callbacks/{gateway}
pub async fn handle_callback(
    State(state): State<CallbackState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);

    let Ok(gateway) = GatewayName::from_str(&gateway) else {
        return json_error_response(
            StatusCode::NOT_FOUND,
            format!("unsupported gateway: {}", gateway),
            request_id,
        )
        .into_response();
    };

    let signature_header = header_str(&headers, SIGNATURE_HEADER)
        .or_else(|| header_str(&headers, SIGNATURE_HEADER_FALLBACK));
    let timestamp_header = header_str(&headers, TIMESTAMP_HEADER).map(String::from);
    let nonce = header_str(&headers, NONCE_HEADER).map(String::from);

    // Audit rows always carry the payload, parseable or not
    let raw_payload: serde_json::Value = serde_json::from_slice(&body).unwrap_or_else(|_| {
        serde_json::json!({ "raw": String::from_utf8_lossy(&body).to_string() })
    });

    let outcome = state
        .signature
        .verify(signature_header, timestamp_header.as_deref(), &body);
    let signature_valid = outcome.as_flag();
    match outcome {
        SignatureOutcome::Valid | SignatureOutcome::Unverified => {}
        SignatureOutcome::Invalid { reason } => {
            if state.signature.enforced() {
                state
                    .reconciler
                    .record_rejection(
                        gateway.as_str(),
                        raw_payload,
                        signature_valid,
                        nonce,
                        timestamp_header,
                        &format!("signature rejected: {}", reason),
                    )
                    .await;
                let mut err = AppError::new(AppErrorKind::Authentication { reason });
                if let Some(id) = request_id {
                    err = err.with_request_id(id);
                }
                return err.into_response();
            }
            warn!(
                gateway = %gateway,
                reason = %reason,
                "invalid callback signature, continuing in log-only mode"
            );
        }
    }

    if let Err(replay_err) = state
        .replay_guard
        .check(nonce.as_deref(), timestamp_header.as_deref(), Utc::now())
        .await
    {
        use crate::gateway::replay::ReplayError;
        if let ReplayError::Ledger(message) = &replay_err {
            // Nonce ledger down: accept and let the audit trail catch up,
            // same contract as any other storage failure after auth.
            error!(gateway = %gateway, error = %message, "nonce ledger unavailable");
            state
                .reconciler
                .record_rejection(
                    gateway.as_str(),
                    raw_payload,
                    signature_valid,
                    nonce,
                    timestamp_header,
                    "nonce ledger unavailable",
                )
                .await;
            return (StatusCode::OK, Json(CallbackAck::store_error())).into_response();
        }
        state
            .reconciler
            .record_rejection(
                gateway.as_str(),
                raw_payload,
                signature_valid,
                nonce,
                timestamp_header,
                &format!("replay guard rejected: {}", replay_err),
            )
            .await;
        let mut err: AppError = replay_err.into();
        if let Some(id) = request_id {
            err = err.with_request_id(id);
        }
        return err.into_response();
    }

    let callback = match decode_stk_callback(&body) {
        Ok(callback) => callback,
        Err(decode_err) => {
            warn!(gateway = %gateway, error = %decode_err, "undecodable callback payload");
            state
                .reconciler
                .record_rejection(
                    gateway.as_str(),
                    raw_payload,
                    signature_valid,
                    nonce,
                    timestamp_header,
                    &decode_err.to_string(),
                )
                .await;
            return (StatusCode::OK, Json(CallbackAck::malformed())).into_response();
        }
    };

    let input = ReconcileInput {
        gateway,
        callback,
        raw_payload: raw_payload.clone(),
        signature_valid,
        nonce: nonce.clone(),
        timestamp_header: timestamp_header.clone(),
    };

    match state.reconciler.process(input).await {
        Ok(ReconcileOutcome::Processed) | Ok(ReconcileOutcome::Duplicate) => {
            (StatusCode::OK, Json(CallbackAck::accepted())).into_response()
        }
        Ok(ReconcileOutcome::RecordNotFound) => {
            (StatusCode::OK, Json(CallbackAck::record_not_found())).into_response()
        }
        Err(e) => {
            error!(gateway = %gateway, error = %e, "reconciliation failed");
            state
                .reconciler
                .record_rejection(
                    gateway.as_str(),
                    raw_payload,
                    signature_valid,
                    nonce,
                    timestamp_header,
                    &e.to_string(),
                )
                .await;
            (StatusCode::OK, Json(CallbackAck::store_error())).into_response()
        }
    }
}
