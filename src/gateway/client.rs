use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::gateway::error::{GatewayError, GatewayResult};

/// Auth carried on an outbound gateway request
#[derive(Clone, Copy)]
pub enum RequestAuth<'a> {
    Basic { username: &'a str, password: &'a str },
    Bearer(&'a str),
}

/// Retrying HTTP client for outbound gateway calls.
///
/// Retries 429s and 5xx responses with exponential backoff; 4xx responses
/// surface immediately as non-retryable provider errors.
#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl GatewayHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::NetworkError {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: RequestAuth<'_>,
    ) -> GatewayResult<T> {
        self.request_json(reqwest::Method::GET, url, auth, None).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: RequestAuth<'_>,
        body: &JsonValue,
    ) -> GatewayResult<T> {
        self.request_json(reqwest::Method::POST, url, auth, Some(body))
            .await
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: RequestAuth<'_>,
        body: Option<&JsonValue>,
    ) -> GatewayResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            request = match auth {
                RequestAuth::Basic { username, password } => {
                    request.basic_auth(username, Some(password))
                }
                RequestAuth::Bearer(token) => request.bearer_auth(token),
            };
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::ProviderError {
                                message: format!("invalid gateway JSON response: {}", e),
                                provider_code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimitError {
                            message: "gateway rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(GatewayError::ProviderError {
                        message: format!("HTTP {}: {}", status, text),
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NetworkError {
            message: "gateway request failed".to_string(),
        }))
    }
}
