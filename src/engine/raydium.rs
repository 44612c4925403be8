//! Raydium trade API adapter

use super::provider::{decode_transaction, f64_field, u64_field, ExecutionProvider, QuoteRequest};
use crate::config::ProviderConfig;
use crate::constants::mints;
use crate::error::ProviderError;
use crate::models::Quote;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

/// Priority fee passed to the transaction builder, micro-lamports per compute unit
const COMPUTE_UNIT_PRICE_MICRO_LAMPORTS: &str = "100000";

pub struct RaydiumProvider {
    id: String,
    api_url: String,
    http_client: reqwest::Client,
    quote_ttl: Duration,
}

impl RaydiumProvider {
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

    fn parse_quote(&self, body: Value, request: &QuoteRequest) -> Result<Quote, ProviderError> {
        check_success(&body)?;

        let data = body
            .get("data")
            .cloned()
            .ok_or_else(|| ProviderError::Api("quote response without data".to_string()))?;

        let in_amount = u64_field(&data, "inputAmount")?;
        let out_amount = u64_field(&data, "outputAmount")?;
        let min_out_amount = u64_field(&data, "otherAmountThreshold").unwrap_or(out_amount);
        // Already a percentage
        let price_impact_pct = f64_field(&data, "priceImpactPct").unwrap_or_default();

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
            platform_fee: 0,
            slippage_bps: request.slippage_bps,
            expires_at: Instant::now() + self.quote_ttl,
            // The whole envelope is echoed back when building
            raw: body,
        })
    }
}

fn check_success(body: &Value) -> Result<(), ProviderError> {
    if body.get("success").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(());
    }
    let message = body
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    if message.to_uppercase().contains("ROUTE") {
        Err(ProviderError::NoRoute(message))
    } else {
        Err(ProviderError::Api(message))
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
impl ExecutionProvider for RaydiumProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, ProviderError> {
        let url = format!("{}/compute/swap-base-in", self.api_url);
        let amount = request.amount.to_string();
        let slippage = request.slippage_bps.to_string();

        tracing::debug!(
            provider = %self.id,
            input = %request.input_mint,
            output = %request.output_mint,
            amount = request.amount,
            "Requesting Raydium quote"
        );

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("inputMint", request.input_mint.as_str()),
                ("outputMint", request.output_mint.as_str()),
                ("amount", amount.as_str()),
                ("slippageBps", slippage.as_str()),
                ("txVersion", "V0"),
            ])
            .send()
            .await
            .map_err(|e| http_error("quote", "Raydium quote request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api(format!("Raydium quote API returned {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| http_error("quote", "Failed to parse Raydium quote", e))?;

        self.parse_quote(body, request)
    }

    async fn build_swap(&self, quote: &Quote, user_public_key: &str) -> Result<Vec<u8>, ProviderError> {
        let url = format!("{}/transaction/swap-base-in", self.api_url);
        let payload = json!({
            "computeUnitPriceMicroLamports": COMPUTE_UNIT_PRICE_MICRO_LAMPORTS,
            "swapResponse": quote.raw,
            "txVersion": "V0",
            "wallet": user_public_key,
            "wrapSol": quote.input_mint == mints::SOL,
            "unwrapSol": quote.output_mint == mints::SOL
        });

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| http_error("swap build", "Raydium swap request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api(format!("Raydium swap API returned {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| http_error("swap build", "Failed to parse Raydium swap", e))?;
        check_success(&body)?;

        let encoded = body
            .pointer("/data/0/transaction")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Api("swap response without transaction".to_string()))?;

        decode_transaction(encoded)
    }
}
