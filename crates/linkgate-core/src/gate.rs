//! ============================================================================
//! LinkGate - Service wiring
//! ============================================================================
//! Builds the cipher, holdings cache, access engine and resolver once at
//! startup from a validated [`GateConfig`] and the injected collaborators.
//! ============================================================================

use std::sync::Arc;
use tracing::info;

use crate::access::{AccessDecision, AccessEngine, HoldingsCache};
use crate::cipher::UrlCipher;
use crate::config::GateConfig;
use crate::kv::KvStore;
use crate::oracle::{BalanceOracle, HeliusOracle};
use crate::resolver::{ClickSink, GatedLinkResolver, LinkSession, PageStore, Resolution};
use crate::sealing::{seal_link, LinkDraft};
use crate::types::{GateError, Link, WalletAddress};

pub struct LinkGate {
    config: GateConfig,
    cipher: Arc<UrlCipher>,
    cache: Arc<HoldingsCache>,
    engine: Arc<AccessEngine>,
    resolver: GatedLinkResolver,
}

impl LinkGate {
    /// Wire the gate around explicit collaborators
    pub fn new(
        config: GateConfig,
        store: Arc<dyn PageStore>,
        oracle: Arc<dyn BalanceOracle>,
        kv: Arc<dyn KvStore>,
        clicks: Arc<dyn ClickSink>,
    ) -> Result<Self, GateError> {
        config.validate()?;

        let cipher = Arc::new(UrlCipher::new(&config)?);
        let cache = Arc::new(HoldingsCache::new(oracle, kv, config.limits));
        let engine = Arc::new(AccessEngine::new(cache.clone()));
        let resolver = GatedLinkResolver::new(store, engine.clone(), cipher.clone(), clicks);

        info!(
            "Link gate ready (ttl {}s, stale {}s, {} oracle calls / {}s per wallet)",
            config.limits.ttl_secs,
            config.limits.stale_ttl_secs,
            config.limits.max_requests,
            config.limits.window_secs
        );

        Ok(Self {
            config,
            cipher,
            cache,
            engine,
            resolver,
        })
    }

    /// Wire the gate with the Helius oracle from the config
    pub fn with_helius(
        config: GateConfig,
        store: Arc<dyn PageStore>,
        kv: Arc<dyn KvStore>,
        clicks: Arc<dyn ClickSink>,
    ) -> Result<Self, GateError> {
        let oracle = Arc::new(HeliusOracle::new(&config)?);
        Self::new(config, store, oracle, kv, clicks)
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn cache(&self) -> &HoldingsCache {
        &self.cache
    }

    pub async fn resolve(
        &self,
        slug: &str,
        link_id: &str,
        visitor: Option<WalletAddress>,
    ) -> Result<Resolution, GateError> {
        self.resolver.resolve(slug, link_id, visitor).await
    }

    pub async fn open(
        &self,
        slug: &str,
        link_id: &str,
        visitor: Option<WalletAddress>,
    ) -> Result<LinkSession, GateError> {
        self.resolver.open(slug, link_id, visitor).await
    }

    pub async fn check_again(&self, session: &mut LinkSession) -> Resolution {
        self.resolver.check_again(session).await
    }

    pub async fn evaluate(
        &self,
        wallet: &WalletAddress,
        token: &str,
        required: &str,
    ) -> Result<AccessDecision, GateError> {
        self.engine.evaluate(wallet.as_str(), token, required, false).await
    }

    /// Encode a draft link for storage
    pub fn seal(&self, draft: LinkDraft) -> Result<Link, GateError> {
        seal_link(draft, &self.cipher)
    }

    /// Let in-flight click events land before shutdown
    pub async fn shutdown(&self) {
        self.resolver.flush_clicks().await;
    }
}
