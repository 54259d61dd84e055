use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Supported payment gateways
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayName {
    Mpesa,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Mpesa => "mpesa",
        }
    }
}

impl fmt::Display for GatewayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mpesa" => Ok(GatewayName::Mpesa),
            _ => Err(()),
        }
    }
}

/// Raw STK push callback envelope as the gateway delivers it.
///
/// The correlation identifiers and result code are required; a payload
/// missing them fails to decode rather than slipping through with defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub item: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: Option<Value>,
}

/// Normalized callback, independent of gateway wire shape
#[derive(Debug, Clone)]
pub struct PaymentCallback {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_desc: String,
    pub receipt_number: Option<String>,
    pub amount: Option<BigDecimal>,
    pub phone_number: Option<String>,
    pub transaction_date: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum CallbackDecodeError {
    #[error("malformed callback payload: {0}")]
    Malformed(String),

    #[error("unusable metadata item: {name}")]
    BadMetadata { name: String },
}

/// Decode and normalize an STK push callback body.
pub fn decode_stk_callback(payload: &[u8]) -> Result<PaymentCallback, CallbackDecodeError> {
    let envelope: StkCallbackEnvelope = serde_json::from_slice(payload)
        .map_err(|e| CallbackDecodeError::Malformed(e.to_string()))?;
    let cb = envelope.body.stk_callback;

    let mut callback = PaymentCallback {
        merchant_request_id: cb.merchant_request_id,
        checkout_request_id: cb.checkout_request_id,
        result_code: cb.result_code,
        result_desc: cb.result_desc,
        receipt_number: None,
        amount: None,
        phone_number: None,
        transaction_date: None,
    };

    if let Some(metadata) = cb.callback_metadata {
        for item in metadata.item {
            let Some(value) = item.value else { continue };
            match item.name.as_str() {
                "Amount" => callback.amount = Some(decode_amount(&item.name, &value)?),
                "MpesaReceiptNumber" => {
                    let receipt = value.as_str().ok_or(CallbackDecodeError::BadMetadata {
                        name: item.name.clone(),
                    })?;
                    callback.receipt_number = Some(receipt.to_string());
                }
                "PhoneNumber" => callback.phone_number = Some(stringify_scalar(&value)),
                "TransactionDate" => callback.transaction_date = Some(stringify_scalar(&value)),
                _ => {}
            }
        }
    }

    Ok(callback)
}

/// Amounts arrive as JSON numbers or numeric strings depending on the
/// gateway version; anything else is rejected.
fn decode_amount(name: &str, value: &Value) -> Result<BigDecimal, CallbackDecodeError> {
    let parsed = match value {
        Value::Number(n) => n.to_string().parse::<BigDecimal>().ok(),
        Value::String(s) => s.trim().parse::<BigDecimal>().ok(),
        _ => None,
    };
    parsed.ok_or(CallbackDecodeError::BadMetadata {
        name: name.to_string(),
    })
}

fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Acknowledgement body returned to the gateway.
///
/// Nonzero codes are internal soft-fail markers: the gateway treats any
/// HTTP 200 as delivered, so these exist for our own logs and for
/// operators replaying callbacks by hand.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }

    pub fn record_not_found() -> Self {
        Self {
            result_code: 1,
            result_desc: "Accepted; no matching payment record".to_string(),
        }
    }

    pub fn store_error() -> Self {
        Self {
            result_code: 2,
            result_desc: "Accepted; deferred due to storage error".to_string(),
        }
    }

    pub fn malformed() -> Self {
        Self {
            result_code: 3,
            result_desc: "Accepted; payload could not be decoded".to_string(),
        }
    }
}
