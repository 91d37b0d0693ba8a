//! ============================================================================
//! Resolver Module - Request-time resolution of gated links
//! ============================================================================
//! Turns (page, link, visitor) into one of:
//! - **Granted**: URL revealed (owner preview, ungated link, or token holder)
//! - **Unauthenticated**: gated link, no wallet connected
//! - **Denied**: wallet holds less than the threshold
//! - **CheckFailed**: the balance could not be determined; offer a retry
//! - **Unresolvable**: this link's stored data is unusable
//!
//! Anonymous visitors and page owners never cost an oracle call.
//! ============================================================================

mod clicks;
mod session;

pub use clicks::{ClickEvent, ClickSink, TracingClickSink};
pub use session::{GateState, LinkSession};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use clicks::ClickRecorder;
use crate::access::AccessEngine;
use crate::cipher::{looks_encrypted, UrlCipher};
use crate::types::{GateError, Link, Page, WalletAddress};

/// Placeholder in a gated URL replaced by the page's connected token
pub const TOKEN_PLACEHOLDER: &str = "[token]";

/// Swap page offered to visitors below the threshold
pub const ACQUIRE_URL_BASE: &str = "https://jup.ag/swap/SOL-";

/// Read access to pages and links
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn get_page(&self, slug: &str) -> Result<Option<Page>, GateError>;

    /// Link `link_id` on page `slug`
    async fn get_link(&self, slug: &str, link_id: &str) -> Result<Option<Link>, GateError>;
}

/// Why a URL was handed out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grant {
    Owner,
    Ungated,
    TokenHolder { balance: String },
}

impl Grant {
    pub fn kind(&self) -> &'static str {
        match self {
            Grant::Owner => "owner",
            Grant::Ungated => "ungated",
            Grant::TokenHolder { .. } => "token_holder",
        }
    }
}

/// Outcome of resolving one link for one visitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Resolution {
    Granted {
        /// None when the link has no destination
        url: Option<String>,
        grant: Grant,
    },
    Unauthenticated,
    Denied {
        balance: String,
        required: String,
        token: String,
        acquire_url: String,
    },
    CheckFailed {
        reason: String,
        retry_after_secs: Option<u64>,
    },
    Unresolvable {
        reason: String,
    },
}

impl Resolution {
    pub fn state(&self) -> GateState {
        match self {
            Resolution::Granted { .. } => GateState::Granted,
            Resolution::Unauthenticated => GateState::Unauthenticated,
            Resolution::Denied { .. } => GateState::Denied,
            Resolution::CheckFailed { .. } | Resolution::Unresolvable { .. } => {
                GateState::CheckFailed
            }
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Resolution::Granted { url, .. } => url.as_deref(),
            _ => None,
        }
    }
}

/// Swap link for acquiring `token`
pub fn acquire_url(token: &str) -> String {
    format!("{}{}", ACQUIRE_URL_BASE, token)
}

/// Resolves links for visitors. Holds no per-request state.
pub struct GatedLinkResolver {
    store: Arc<dyn PageStore>,
    engine: Arc<AccessEngine>,
    cipher: Arc<UrlCipher>,
    clicks: ClickRecorder,
}

impl GatedLinkResolver {
    pub fn new(
        store: Arc<dyn PageStore>,
        engine: Arc<AccessEngine>,
        cipher: Arc<UrlCipher>,
        clicks: Arc<dyn ClickSink>,
    ) -> Self {
        Self {
            store,
            engine,
            cipher,
            clicks: ClickRecorder::new(clicks),
        }
    }

    /// Wait for in-flight click events, e.g. before a short-lived process exits
    pub async fn flush_clicks(&self) {
        self.clicks.flush().await;
    }

    /// Resolve a link in one step.
    ///
    /// # Errors
    ///
    /// `NotFound` when the page or link does not exist, `Store` when they
    /// cannot be read. Every other outcome is a [`Resolution`].
    pub async fn resolve(
        &self,
        slug: &str,
        link_id: &str,
        visitor: Option<WalletAddress>,
    ) -> Result<Resolution, GateError> {
        let mut session = self.open(slug, link_id, visitor).await?;
        Ok(self.advance(&mut session).await)
    }

    /// Load the page and link for a multi-step session
    pub async fn open(
        &self,
        slug: &str,
        link_id: &str,
        visitor: Option<WalletAddress>,
    ) -> Result<LinkSession, GateError> {
        let page = self
            .store
            .get_page(slug)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("page '{}'", slug)))?;
        let link = self
            .store
            .get_link(slug, link_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("link '{}' on page '{}'", link_id, slug)))?;

        Ok(LinkSession::new(page, link, visitor))
    }

    /// Evaluate the session's current visitor, using cached holdings when fresh
    pub async fn advance(&self, session: &mut LinkSession) -> Resolution {
        let resolution = self.evaluate(session, false).await;
        session.finish(resolution)
    }

    /// "Check again": re-evaluate with a forced holdings refresh. The refresh
    /// still spends rate-limit budget and falls back to cached holdings when
    /// the budget is gone.
    pub async fn check_again(&self, session: &mut LinkSession) -> Resolution {
        session.begin_check();
        let resolution = self.evaluate(session, true).await;
        session.finish(resolution)
    }

    async fn evaluate(&self, session: &LinkSession, force_refresh: bool) -> Resolution {
        let page = session.page();
        let link = session.link();

        if let Some(visitor) = session.visitor() {
            if page.is_owned_by(visitor) {
                debug!("Owner preview of {}/{}", page.slug, link.id);
                return self.grant_stored(page, link, Grant::Owner);
            }
        }

        let (token, required) = match (
            link.token_gated,
            page.connected_token(),
            link.required_amount(),
        ) {
            (true, Some(token), Some(required)) => (token, required),
            _ => return self.grant_stored(page, link, Grant::Ungated),
        };

        let wallet = match session.wallet() {
            Ok(wallet) => wallet,
            Err(e) => {
                debug!("{} for {}/{}", e, page.slug, link.id);
                return Resolution::Unauthenticated;
            }
        };

        match self
            .engine
            .evaluate(wallet.as_str(), token, required, force_refresh)
            .await
        {
            Ok(decision) if decision.has_access => {
                self.grant_gated(page, link, token, decision.balance)
            }
            Ok(decision) => Resolution::Denied {
                acquire_url: acquire_url(&decision.token),
                balance: decision.balance,
                required: decision.required,
                token: decision.token,
            },
            Err(GateError::InvalidAmount(reason)) => {
                warn!(
                    "Link {}/{} has an unusable threshold: {}",
                    page.slug, link.id, reason
                );
                Resolution::Unresolvable {
                    reason: format!("invalid token threshold: {}", reason),
                }
            }
            Err(e) => {
                warn!(
                    "Balance check failed for {} on {}/{}: {}",
                    wallet, page.slug, link.id, e
                );
                Resolution::CheckFailed {
                    retry_after_secs: e.retry_after_secs(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Owner and ungated grants: a value shaped like a record must decrypt,
    /// anything else is handed out as stored
    fn grant_stored(&self, page: &Page, link: &Link, grant: Grant) -> Resolution {
        let url = match stored_url(link) {
            None => return Resolution::Granted { url: None, grant },
            Some(url) if looks_encrypted(url) => match self.cipher.decrypt(url) {
                Ok(plain) => plain,
                Err(e) => return unresolvable(page, link, e),
            },
            Some(url) => url.to_string(),
        };

        self.finish_grant(page, link, url, grant)
    }

    /// Token-holder grant: a value shaped like a record must decrypt
    fn grant_gated(&self, page: &Page, link: &Link, token: &str, balance: String) -> Resolution {
        let grant = Grant::TokenHolder { balance };
        let url = match stored_url(link) {
            None => return Resolution::Granted { url: None, grant },
            Some(url) if looks_encrypted(url) => match self.cipher.decrypt(url) {
                Ok(plain) => plain,
                Err(e) => return unresolvable(page, link, e),
            },
            Some(url) => {
                warn!(
                    "Gated link {}/{} is stored unencrypted",
                    page.slug, link.id
                );
                url.to_string()
            }
        };

        let url = url.replace(TOKEN_PLACEHOLDER, token);
        self.finish_grant(page, link, url, grant)
    }

    fn finish_grant(&self, page: &Page, link: &Link, url: String, grant: Grant) -> Resolution {
        info!("Granted {}/{} ({})", page.slug, link.id, grant.kind());
        self.clicks
            .emit(ClickEvent::new(&page.slug, &link.id, grant.clone()));
        Resolution::Granted {
            url: Some(url),
            grant,
        }
    }
}

fn stored_url(link: &Link) -> Option<&str> {
    link.url.as_deref().filter(|u| !u.is_empty())
}

fn unresolvable(page: &Page, link: &Link, error: GateError) -> Resolution {
    warn!("Cannot decrypt link {}/{}: {}", page.slug, link.id, error);
    Resolution::Unresolvable {
        reason: "link destination could not be decrypted".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::HoldingsCache;
    use crate::config::{CacheLimits, Secret};
    use crate::kv::MemoryKv;
    use crate::testing::{ChannelClickSink, FailingClickSink, FakeOracle, MemoryPages};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const OWNER: &str = "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN";
    const HOLDER: &str = "8i51XNNpGaKaj4G4nDdmQh95v4FKAxw8mhtaRoKd9tE8";
    const SMALL_HOLDER: &str = "11111111111111111111111111111111";
    const TOKEN: &str = "TOKEN123";
    const SECRET_URL: &str = "https://discord.gg/members-only";

    struct Fixture {
        oracle: Arc<FakeOracle>,
        pages: Arc<MemoryPages>,
        cipher: Arc<UrlCipher>,
        clicks: mpsc::UnboundedReceiver<ClickEvent>,
        resolver: GatedLinkResolver,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = mpsc::unbounded_channel();
        fixture_with_sink(Arc::new(ChannelClickSink(tx)), rx)
    }

    fn fixture_with_sink(
        sink: Arc<dyn ClickSink>,
        clicks: mpsc::UnboundedReceiver<ClickEvent>,
    ) -> Fixture {
        let oracle = Arc::new(
            FakeOracle::new()
                .with_holding(HOLDER, TOKEN, "75")
                .with_holding(SMALL_HOLDER, TOKEN, "10"),
        );
        let cipher = Arc::new(UrlCipher::with_iterations(Secret::new("test-secret"), 1_000).unwrap());
        let pages = Arc::new(MemoryPages::new());

        pages.insert_page(Page {
            slug: "p".into(),
            owner_wallet: OWNER.into(),
            connected_token: Some(TOKEN.into()),
            created_at: 0,
            updated_at: 0,
        });
        pages.insert_page(Page {
            slug: "plain".into(),
            owner_wallet: OWNER.into(),
            connected_token: None,
            created_at: 0,
            updated_at: 0,
        });
        pages.insert_link(
            "p",
            gated_link("l", Some(cipher.encrypt(SECRET_URL).unwrap())),
        );
        pages.insert_link(
            "plain",
            Link {
                token_gated: false,
                required_tokens: vec![],
                ..gated_link("site", Some("https://example.com/x".into()))
            },
        );

        let cache = HoldingsCache::new(
            oracle.clone(),
            Arc::new(MemoryKv::new()),
            CacheLimits::default(),
        );
        let resolver = GatedLinkResolver::new(
            pages.clone(),
            Arc::new(AccessEngine::new(Arc::new(cache))),
            cipher.clone(),
            sink,
        );

        Fixture {
            oracle,
            pages,
            cipher,
            clicks,
            resolver,
        }
    }

    fn gated_link(id: &str, url: Option<String>) -> Link {
        Link {
            id: id.into(),
            preset_id: "discord".into(),
            url,
            token_gated: true,
            required_tokens: vec!["50".into()],
            position: 0,
        }
    }

    fn wallet(s: &str) -> Option<WalletAddress> {
        Some(WalletAddress::parse(s).unwrap())
    }

    async fn next_click(rx: &mut mpsc::UnboundedReceiver<ClickEvent>) -> Option<ClickEvent> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_holder_granted_and_small_holder_denied() {
        let mut f = fixture();

        let granted = f.resolver.resolve("p", "l", wallet(HOLDER)).await.unwrap();
        assert_eq!(
            granted,
            Resolution::Granted {
                url: Some(SECRET_URL.into()),
                grant: Grant::TokenHolder {
                    balance: "75".into()
                },
            }
        );

        let denied = f
            .resolver
            .resolve("p", "l", wallet(SMALL_HOLDER))
            .await
            .unwrap();
        assert_eq!(
            denied,
            Resolution::Denied {
                balance: "10".into(),
                required: "50".into(),
                token: TOKEN.into(),
                acquire_url: "https://jup.ag/swap/SOL-TOKEN123".into(),
            }
        );

        let click = next_click(&mut f.clicks).await.unwrap();
        assert_eq!(click.link_id, "l");
        assert_eq!(click.grant.kind(), "token_holder");
        assert!(next_click(&mut f.clicks).await.is_none());
    }

    #[tokio::test]
    async fn test_owner_bypasses_balance_check() {
        let mut f = fixture();
        let resolution = f.resolver.resolve("p", "l", wallet(OWNER)).await.unwrap();

        assert_eq!(resolution.url(), Some(SECRET_URL));
        assert!(matches!(
            resolution,
            Resolution::Granted {
                grant: Grant::Owner,
                ..
            }
        ));
        assert_eq!(f.oracle.calls(), 0);
        assert_eq!(next_click(&mut f.clicks).await.unwrap().grant, Grant::Owner);
    }

    #[tokio::test]
    async fn test_ungated_link_for_anyone() {
        let f = fixture();
        for visitor in [None, wallet(HOLDER)] {
            let resolution = f.resolver.resolve("plain", "site", visitor).await.unwrap();
            assert_eq!(resolution.url(), Some("https://example.com/x"));
        }
        assert_eq!(f.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_gated_link_without_connected_token_is_ungated() {
        let f = fixture();
        let record = f.cipher.encrypt("https://example.com/vip").unwrap();
        f.pages.insert_link("plain", gated_link("vip", Some(record)));

        let resolution = f.resolver.resolve("plain", "vip", None).await.unwrap();
        assert_eq!(resolution.url(), Some("https://example.com/vip"));
        assert_eq!(f.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_visitor_needs_wallet() {
        let f = fixture();
        let resolution = f.resolver.resolve("p", "l", None).await.unwrap();
        assert_eq!(resolution, Resolution::Unauthenticated);
        assert_eq!(f.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_oracle_outage_is_not_a_denial() {
        let f = fixture();
        f.oracle
            .fail_with(Some(GateError::OracleUnavailable("timeout".into())));

        let resolution = f.resolver.resolve("p", "l", wallet(HOLDER)).await.unwrap();
        assert!(matches!(resolution, Resolution::CheckFailed { .. }));
        assert_eq!(resolution.state(), GateState::CheckFailed);
    }

    #[tokio::test]
    async fn test_rate_limited_check_carries_retry_hint() {
        let f = fixture();
        f.oracle
            .fail_with(Some(GateError::OracleUnavailable("down".into())));
        let mut session = f.resolver.open("p", "l", wallet(HOLDER)).await.unwrap();

        // Default budget is 3 calls per window; all fail with nothing cached
        for _ in 0..3 {
            f.resolver.check_again(&mut session).await;
        }
        match f.resolver.check_again(&mut session).await {
            Resolution::CheckFailed {
                retry_after_secs: Some(secs),
                ..
            } => assert!(secs > 0),
            other => panic!("expected rate-limited CheckFailed, got {:?}", other),
        }
        assert_eq!(f.oracle.calls(), 3);
    }

    #[tokio::test]
    async fn test_session_sign_in_then_check_again() {
        let f = fixture();
        let mut session = f.resolver.open("p", "l", None).await.unwrap();
        assert_eq!(session.state(), GateState::Unauthenticated);

        assert_eq!(
            f.resolver.advance(&mut session).await,
            Resolution::Unauthenticated
        );

        session.sign_in(WalletAddress::parse(SMALL_HOLDER).unwrap());
        assert_eq!(session.state(), GateState::Checking);
        f.resolver.advance(&mut session).await;
        assert_eq!(session.state(), GateState::Denied);

        // Visitor buys more tokens, then asks for a re-check
        f.oracle.set_holding(SMALL_HOLDER, TOKEN, "500");
        let reads_before = f.pages.reads();
        let resolution = f.resolver.check_again(&mut session).await;
        assert_eq!(resolution.url(), Some(SECRET_URL));
        assert_eq!(session.state(), GateState::Granted);
        assert_eq!(f.pages.reads(), reads_before);
        assert_eq!(f.oracle.calls(), 2);
    }

    #[tokio::test]
    async fn test_token_placeholder_substituted_for_holders() {
        let f = fixture();
        let record = f
            .cipher
            .encrypt("https://birdeye.so/token/[token]")
            .unwrap();
        f.pages.insert_link("p", gated_link("chart", Some(record)));

        let resolution = f
            .resolver
            .resolve("p", "chart", wallet(HOLDER))
            .await
            .unwrap();
        assert_eq!(resolution.url(), Some("https://birdeye.so/token/TOKEN123"));
    }

    #[tokio::test]
    async fn test_plaintext_gated_url_is_tolerated() {
        let f = fixture();
        f.pages.insert_link(
            "p",
            gated_link("legacy", Some("https://example.com:8080/x".into())),
        );

        let resolution = f
            .resolver
            .resolve("p", "legacy", wallet(HOLDER))
            .await
            .unwrap();
        assert_eq!(resolution.url(), Some("https://example.com:8080/x"));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_unresolvable() {
        let f = fixture();
        let foreign = UrlCipher::with_iterations(Secret::new("other-secret"), 1_000)
            .unwrap()
            .encrypt(SECRET_URL)
            .unwrap();
        f.pages.insert_link("p", gated_link("broken", Some(foreign)));

        let resolution = f
            .resolver
            .resolve("p", "broken", wallet(HOLDER))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Unresolvable { .. }));

        // Other links on the page still resolve
        let ok = f.resolver.resolve("p", "l", wallet(HOLDER)).await.unwrap();
        assert_eq!(ok.url(), Some(SECRET_URL));
    }

    #[tokio::test]
    async fn test_owner_with_foreign_record_is_unresolvable() {
        let mut f = fixture();
        let foreign = UrlCipher::with_iterations(Secret::new("other-secret"), 1_000)
            .unwrap()
            .encrypt(SECRET_URL)
            .unwrap();
        f.pages.insert_link("p", gated_link("broken", Some(foreign.clone())));
        f.pages.insert_link(
            "plain",
            Link {
                token_gated: false,
                required_tokens: vec![],
                ..gated_link("stale-seal", Some(foreign))
            },
        );

        let owner = f.resolver.resolve("p", "broken", wallet(OWNER)).await.unwrap();
        assert!(matches!(owner, Resolution::Unresolvable { .. }));

        let ungated = f.resolver.resolve("plain", "stale-seal", None).await.unwrap();
        assert!(matches!(ungated, Resolution::Unresolvable { .. }));

        assert_eq!(f.oracle.calls(), 0);
        assert!(next_click(&mut f.clicks).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_threshold_is_unresolvable() {
        let f = fixture();
        f.pages.insert_link(
            "p",
            Link {
                required_tokens: vec!["lots".into()],
                ..gated_link("odd", None)
            },
        );
        let resolution = f.resolver.resolve("p", "odd", wallet(HOLDER)).await.unwrap();
        assert!(matches!(resolution, Resolution::Unresolvable { .. }));
        assert_eq!(f.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_url_grants_without_click() {
        let mut f = fixture();
        f.pages.insert_link("p", gated_link("empty", None));

        let resolution = f
            .resolver
            .resolve("p", "empty", wallet(HOLDER))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Granted { url: None, .. }));
        assert!(next_click(&mut f.clicks).await.is_none());
    }

    #[tokio::test]
    async fn test_not_found() {
        let f = fixture();
        assert!(matches!(
            f.resolver.resolve("nope", "l", None).await,
            Err(GateError::NotFound(_))
        ));
        assert!(matches!(
            f.resolver.resolve("p", "nope", None).await,
            Err(GateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_click_sink_failure_does_not_block() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let f = fixture_with_sink(Arc::new(FailingClickSink), rx);

        let resolution = f.resolver.resolve("p", "l", wallet(HOLDER)).await.unwrap();
        assert_eq!(resolution.url(), Some(SECRET_URL));
        f.resolver.flush_clicks().await;
    }

    #[tokio::test]
    async fn test_flush_waits_for_recorded_clicks() {
        let mut f = fixture();
        f.resolver.resolve("p", "l", wallet(OWNER)).await.unwrap();
        f.resolver.resolve("plain", "site", None).await.unwrap();
        f.resolver.flush_clicks().await;

        let mut kinds = vec![
            f.clicks.try_recv().unwrap().grant.kind(),
            f.clicks.try_recv().unwrap().grant.kind(),
        ];
        kinds.sort();
        assert_eq!(kinds, vec!["owner", "ungated"]);
    }

    #[test]
    fn test_resolution_json_shape() {
        let json = serde_json::to_value(Resolution::Granted {
            url: Some("https://x.y".into()),
            grant: Grant::TokenHolder {
                balance: "75".into(),
            },
        })
        .unwrap();
        assert_eq!(json["state"], "granted");
        assert_eq!(json["grant"]["kind"], "token_holder");
        assert_eq!(json["grant"]["balance"], "75");
    }
}
