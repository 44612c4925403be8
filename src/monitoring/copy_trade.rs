//! Copy-trade subscriber
//!
//! Turns a purchase event into one buy intent per owner watching the
//! address. Orders run in the background; the engine serializes them per
//! owner.

use super::supervisor::PurchaseSubscriber;
use crate::config::CopyTradeConfig;
use crate::engine::{OrderEngine, TransactionSigner};
use crate::models::{OrderIntent, PurchaseEvent};
use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::prelude::*;
use std::sync::Arc;

/// Per-owner copy-trade limits
#[derive(Debug, Clone, PartialEq)]
pub struct CopySettings {
    pub enabled: bool,
    /// SOL spent per copied purchase
    pub buy_amount_sol: Decimal,
    /// Hard cap per order
    pub max_buy_sol: Decimal,
    pub max_slippage_bps: u32,
}

impl CopySettings {
    /// Amount to spend, capped
    pub fn order_amount(&self) -> Decimal {
        self.buy_amount_sol.min(self.max_buy_sol)
    }
}

impl From<&CopyTradeConfig> for CopySettings {
    fn from(config: &CopyTradeConfig) -> Self {
        Self {
            enabled: config.enabled,
            buy_amount_sol: Decimal::from_f64(config.buy_amount_sol).unwrap_or_default(),
            max_buy_sol: Decimal::from_f64(config.max_buy_sol).unwrap_or_default(),
            max_slippage_bps: config.max_slippage_bps,
        }
    }
}

/// Source of per-user trading constraints
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// `None` when the owner has no copy-trade settings
    async fn copy_settings(&self, owner_id: &str) -> anyhow::Result<Option<CopySettings>>;
}

/// Key-custody collaborator handing out a signer for one call
#[async_trait]
pub trait SignerProvider: Send + Sync {
    async fn signer_for(&self, owner_id: &str) -> anyhow::Result<Arc<dyn TransactionSigner>>;
}

/// Same settings for every owner, from configuration
pub struct StaticSettings {
    settings: CopySettings,
}

impl StaticSettings {
    pub fn new(settings: CopySettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn copy_settings(&self, _owner_id: &str) -> anyhow::Result<Option<CopySettings>> {
        Ok(Some(self.settings.clone()))
    }
}

/// One signer shared by every owner, for single-wallet deployments
pub struct SharedSigner {
    signer: Arc<dyn TransactionSigner>,
}

impl SharedSigner {
    pub fn new(signer: Arc<dyn TransactionSigner>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl SignerProvider for SharedSigner {
    async fn signer_for(&self, _owner_id: &str) -> anyhow::Result<Arc<dyn TransactionSigner>> {
        Ok(self.signer.clone())
    }
}

pub struct CopyTradeSubscriber {
    engine: Arc<OrderEngine>,
    settings: Arc<dyn SettingsProvider>,
    signers: Arc<dyn SignerProvider>,
}

impl CopyTradeSubscriber {
    pub fn new(
        engine: Arc<OrderEngine>,
        settings: Arc<dyn SettingsProvider>,
        signers: Arc<dyn SignerProvider>,
    ) -> Self {
        Self {
            engine,
            settings,
            signers,
        }
    }

    /// Intent for one owner, `None` when copy trading is off for them
    async fn intent_for(&self, event: &PurchaseEvent, owner_id: &str) -> anyhow::Result<Option<OrderIntent>> {
        let Some(settings) = self
            .settings
            .copy_settings(owner_id)
            .await
            .with_context(|| format!("loading copy settings for {}", owner_id))?
        else {
            return Ok(None);
        };

        let amount = settings.order_amount();
        if !settings.enabled || amount <= Decimal::ZERO {
            return Ok(None);
        }

        let mut intent = OrderIntent::buy(owner_id, &event.acquired_mint, amount, settings.max_slippage_bps);
        intent.originating_event_id = Some(event.source_signature.clone());
        Ok(Some(intent))
    }
}

#[async_trait]
impl PurchaseSubscriber for CopyTradeSubscriber {
    fn name(&self) -> &str {
        "copy_trade"
    }

    async fn on_purchase_event(&self, event: &PurchaseEvent, owners: &[String]) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        for owner_id in owners {
            let intent = match self.intent_for(event, owner_id).await {
                Ok(Some(intent)) => intent,
                Ok(None) => {
                    tracing::debug!(owner = %owner_id, "Copy trading disabled for owner");
                    continue;
                }
                Err(e) => {
                    errors.push(format!("{}: {:#}", owner_id, e));
                    continue;
                }
            };

            let signer = match self.signers.signer_for(owner_id).await {
                Ok(signer) => signer,
                Err(e) => {
                    errors.push(format!("{}: no signer: {:#}", owner_id, e));
                    continue;
                }
            };

            tracing::info!(
                owner = %owner_id,
                token = %intent.token_address,
                amount = %intent.amount,
                source = %event.source_signature,
                "Copying purchase"
            );

            let engine = self.engine.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.submit_order(intent, signer.as_ref()).await {
                    tracing::warn!(error = %e, "Copy order did not execute");
                }
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(errors.join("; ")))
        }
    }
}
