use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::gateway::client::{GatewayHttpClient, RequestAuth};
use crate::gateway::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone)]
pub struct DarajaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub passkey: String,
    pub shortcode: String,
    pub base_url: String,
    pub callback_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl DarajaConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let consumer_key = std::env::var("MPESA_CONSUMER_KEY").unwrap_or_default();
        let consumer_secret = std::env::var("MPESA_CONSUMER_SECRET").unwrap_or_default();
        let passkey = std::env::var("MPESA_PASSKEY").unwrap_or_default();
        let shortcode = std::env::var("MPESA_SHORTCODE").unwrap_or_default();
        let callback_url = std::env::var("MPESA_CALLBACK_URL").unwrap_or_default();
        if consumer_key.is_empty()
            || consumer_secret.is_empty()
            || passkey.is_empty()
            || shortcode.is_empty()
            || callback_url.is_empty()
        {
            return Err(GatewayError::ValidationError {
                message: "MPESA_CONSUMER_KEY, MPESA_CONSUMER_SECRET, MPESA_PASSKEY, \
                          MPESA_SHORTCODE and MPESA_CALLBACK_URL are required"
                    .to_string(),
                field: Some("mpesa".to_string()),
            });
        }
        let base_url = std::env::var("MPESA_BASE_URL")
            .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string());
        let timeout_secs = std::env::var("MPESA_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let max_retries = std::env::var("MPESA_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);
        Ok(Self {
            consumer_key,
            consumer_secret,
            passkey,
            shortcode,
            base_url,
            callback_url,
            timeout_secs,
            max_retries,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OauthTokenResponse {
    access_token: String,
}

/// Gateway acceptance of an STK push request. The correlation identifiers
/// here are what the eventual callback is matched against.
#[derive(Debug, Clone, Deserialize)]
pub struct StkPushAcceptance {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: Option<String>,
}

/// Client for the Daraja STK push API
pub struct DarajaClient {
    config: DarajaConfig,
    http: GatewayHttpClient,
}

impl DarajaClient {
    pub fn new(config: DarajaConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(DarajaConfig::from_env()?)
    }

    async fn access_token(&self) -> GatewayResult<String> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let response: OauthTokenResponse = self
            .http
            .get_json(
                &url,
                RequestAuth::Basic {
                    username: &self.config.consumer_key,
                    password: &self.config.consumer_secret,
                },
            )
            .await?;
        Ok(response.access_token)
    }

    /// Push a payment prompt to the customer's phone.
    ///
    /// Amounts are truncated to whole shillings; the API rejects fractions.
    pub async fn stk_push(
        &self,
        amount: &BigDecimal,
        phone_number: &str,
        account_reference: &str,
        description: &str,
    ) -> GatewayResult<StkPushAcceptance> {
        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = daraja_password(&self.config.shortcode, &self.config.passkey, &timestamp);
        let msisdn = normalize_msisdn(phone_number)?;
        let whole_amount = amount.with_scale(0).to_string();

        let body = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": whole_amount,
            "PartyA": msisdn,
            "PartyB": self.config.shortcode,
            "PhoneNumber": msisdn,
            "CallBackURL": self.config.callback_url,
            "AccountReference": account_reference,
            "TransactionDesc": description,
        });

        let url = format!(
            "{}/mpesa/stkpush/v1/processrequest",
            self.config.base_url
        );
        let acceptance: StkPushAcceptance = self
            .http
            .post_json(&url, RequestAuth::Bearer(&token), &body)
            .await?;

        info!(
            merchant_request_id = %acceptance.merchant_request_id,
            checkout_request_id = %acceptance.checkout_request_id,
            response_code = %acceptance.response_code,
            "stk push submitted"
        );
        Ok(acceptance)
    }
}

fn daraja_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// Normalize a phone number to the 2547XXXXXXXX form the API expects
fn normalize_msisdn(raw: &str) -> GatewayResult<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let msisdn = if let Some(rest) = digits.strip_prefix("254") {
        format!("254{}", rest)
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("254{}", rest)
    } else if digits.len() == 9 {
        format!("254{}", digits)
    } else {
        digits.clone()
    };
    if msisdn.len() != 12 || !msisdn.starts_with("254") {
        return Err(GatewayError::ValidationError {
            message: format!("unrecognized phone number format: {}", raw),
            field: Some("phone_number".to_string()),
        });
    }
    Ok(msisdn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_base64_of_concatenation() {
        let password = daraja_password("174379", "passkey", "20240101120000");
        let decoded = BASE64.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20240101120000");
    }

    #[test]
    fn normalizes_local_phone_formats() {
        assert_eq!(normalize_msisdn("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("+254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("712345678").unwrap(), "254712345678");
    }

    #[test]
    fn rejects_unrecognizable_phone() {
        assert!(normalize_msisdn("12").is_err());
        assert!(normalize_msisdn("not a number").is_err());
    }
}
