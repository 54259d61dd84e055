use bigdecimal::BigDecimal;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::pending_payment_repository::{PendingPayment, PendingPaymentRepository};
use crate::gateway::daraja::DarajaClient;
use crate::gateway::error::GatewayError;

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub tier: String,
    pub amount: BigDecimal,
    pub phone_number: String,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Initiates STK push payments and records the pending payment the
/// eventual callback will reconcile against.
pub struct CheckoutService {
    daraja: DarajaClient,
    payments: PendingPaymentRepository,
}

impl CheckoutService {
    pub fn new(daraja: DarajaClient, payments: PendingPaymentRepository) -> Self {
        Self { daraja, payments }
    }

    pub async fn initiate(&self, request: CheckoutRequest) -> Result<PendingPayment, CheckoutError> {
        let acceptance = self
            .daraja
            .stk_push(
                &request.amount,
                &request.phone_number,
                &request.tier,
                "Pambo subscription",
            )
            .await?;

        if acceptance.response_code != "0" {
            return Err(CheckoutError::Gateway(GatewayError::ProviderError {
                message: format!(
                    "stk push not accepted: {} ({})",
                    acceptance.response_description, acceptance.response_code
                ),
                provider_code: Some(acceptance.response_code),
                retryable: false,
            }));
        }

        let payment = self
            .payments
            .create(
                &acceptance.merchant_request_id,
                &acceptance.checkout_request_id,
                request.user_id,
                &request.tier,
                request.amount.clone(),
                Some(&request.phone_number),
            )
            .await?;

        info!(
            payment_id = %payment.id,
            user_id = %request.user_id,
            tier = %request.tier,
            "pending payment recorded"
        );
        Ok(payment)
    }
}
