//! Jupiter swap API adapter

use super::provider::{decode_transaction, f64_field, u64_field, ExecutionProvider, QuoteRequest};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::Quote;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

pub struct JupiterProvider {
    id: String,
    api_url: String,
    http_client: reqwest::Client,
    quote_ttl: Duration,
}

impl JupiterProvider {
    pub fn new(id: &str, config: &ProviderConfig, quote_ttl: Duration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ProviderError::Api(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            id: id.to_string(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            http_client,
            quote_ttl,
        })
    }

    fn parse_quote(&self, raw: Value, request: &QuoteRequest) -> Result<Quote, ProviderError> {
        let in_amount = u64_field(&raw, "inAmount")?;
        let out_amount = u64_field(&raw, "outAmount")?;
        let min_out_amount = u64_field(&raw, "otherAmountThreshold").unwrap_or(out_amount);
        // Reported as a fraction
        let price_impact_pct = f64_field(&raw, "priceImpactPct").unwrap_or_default() * 100.0;
        let platform_fee = raw
            .get("platformFee")
            .filter(|fee| !fee.is_null())
            .and_then(|fee| u64_field(fee, "amount").ok())
            .unwrap_or_default();

        if out_amount == 0 {
            return Err(ProviderError::NoRoute("quote returned zero output".to_string()));
        }

        Ok(Quote {
            provider: self.id.clone(),
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            in_amount,
            out_amount,
            min_out_amount,
            price_impact_pct,
            platform_fee,
            slippage_bps: request.slippage_bps,
            expires_at: Instant::now() + self.quote_ttl,
            raw,
        })
    }
}

fn http_error(stage: &'static str, context: &str, e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout { stage }
    } else {
        ProviderError::Api(format!("{}: {}", context, e))
    }
}

#[async_trait]
impl ExecutionProvider for JupiterProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, ProviderError> {
        let url = format!("{}/quote", self.api_url);
        let amount = request.amount.to_string();
        let slippage = request.slippage_bps.to_string();

        tracing::debug!(
            provider = %self.id,
            input = %request.input_mint,
            output = %request.output_mint,
            amount = request.amount,
            "Requesting Jupiter quote"
        );

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("inputMint", request.input_mint.as_str()),
                ("outputMint", request.output_mint.as_str()),
                ("amount", amount.as_str()),
                ("slippageBps", slippage.as_str()),
            ])
            .send()
            .await
            .map_err(|e| http_error("quote", "Jupiter quote request failed", e))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| http_error("quote", "Failed to parse Jupiter quote", e))?;

        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            let code = body.get("errorCode").and_then(Value::as_str).unwrap_or_default();
            if code.contains("ROUTE") || message.to_lowercase().contains("no route") {
                return Err(ProviderError::NoRoute(message));
            }
            return Err(ProviderError::Api(format!("HTTP {}: {}", status, message)));
        }

        self.parse_quote(body, request)
    }

    async fn build_swap(&self, quote: &Quote, user_public_key: &str) -> Result<Vec<u8>, ProviderError> {
        let url = format!("{}/swap", self.api_url);
        let payload = json!({
            "quoteResponse": quote.raw,
            "userPublicKey": user_public_key,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "prioritizationFeeLamports": "auto"
        });

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| http_error("swap build", "Jupiter swap request failed", e))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| http_error("swap build", "Failed to parse Jupiter swap", e))?;

        if !status.is_success() {
            let message = body.get("error").and_then(Value::as_str).unwrap_or("unknown error");
            return Err(ProviderError::Api(format!("HTTP {}: {}", status, message)));
        }

        let encoded = body
            .get("swapTransaction")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Api("swap response without swapTransaction".to_string()))?;

        decode_transaction(encoded)
    }
}
