//! Payment initiation and subscription maintenance endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppErrorKind};
use crate::services::checkout::{CheckoutError, CheckoutRequest, CheckoutService};
use crate::services::subscription::SubscriptionService;

#[derive(Clone)]
pub struct PaymentsState {
    pub checkout: Arc<CheckoutService>,
    pub subscriptions: Arc<SubscriptionService>,
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub user_id: Uuid,
    pub tier: String,
    pub amount: BigDecimal,
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub status: String,
}

/// POST /api/payments/initiate
pub async fn initiate_payment(
    State(state): State<PaymentsState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Response, AppError> {
    if request.tier.trim().is_empty() {
        return Err(AppError::new(AppErrorKind::Validation {
            field: "tier".to_string(),
            message: "must not be empty".to_string(),
        }));
    }
    if request.amount <= BigDecimal::from(0) {
        return Err(AppError::new(AppErrorKind::Validation {
            field: "amount".to_string(),
            message: "must be greater than zero".to_string(),
        }));
    }
    if request.phone_number.trim().is_empty() {
        return Err(AppError::new(AppErrorKind::Validation {
            field: "phone_number".to_string(),
            message: "must not be empty".to_string(),
        }));
    }

    let payment = state
        .checkout
        .initiate(CheckoutRequest {
            user_id: request.user_id,
            tier: request.tier,
            amount: request.amount,
            phone_number: request.phone_number,
        })
        .await
        .map_err(|e| -> AppError {
            match e {
                CheckoutError::Gateway(gateway_err) => gateway_err.into(),
                CheckoutError::Store(db_err) => db_err.into(),
            }
        })?;

    let response = InitiatePaymentResponse {
        payment_id: payment.id,
        merchant_request_id: payment.merchant_request_id,
        checkout_request_id: payment.checkout_request_id,
        status: payment.status,
    };
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

#[derive(Debug, Serialize)]
pub struct RederiveResponse {
    pub user_id: Uuid,
    pub tier: Option<String>,
}

/// POST /api/subscriptions/{user_id}/rederive
///
/// Operator surface: re-applies the tier implied by the user's latest
/// completed payment, for cases where the callback completed but the
/// activation step failed.
pub async fn rederive_subscription(
    State(state): State<PaymentsState>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let tier = state.subscriptions.rederive_for_user(user_id).await?;
    Ok((StatusCode::OK, Json(RederiveResponse { user_id, tier })).into_response())
}
