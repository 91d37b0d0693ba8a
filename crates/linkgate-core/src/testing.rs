// Test doubles shared by the cache, engine and resolver tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::oracle::BalanceOracle;
use crate::resolver::{ClickEvent, ClickSink, PageStore};
use crate::types::{GateError, Link, Page, WalletHolding, NATIVE_TOKEN};

/// Balance oracle answering from a fixed table, counting every call
#[derive(Default)]
pub(crate) struct FakeOracle {
    holdings: Mutex<HashMap<String, Vec<WalletHolding>>>,
    failure: Mutex<Option<GateError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holding(self, wallet: &str, token: &str, balance: &str) -> Self {
        self.set_holding(wallet, token, balance);
        self
    }

    pub fn set_holding(&self, wallet: &str, token: &str, balance: &str) {
        let mut map = self.holdings.lock().unwrap();
        let entry = map
            .entry(wallet.to_string())
            .or_insert_with(|| vec![WalletHolding::new(NATIVE_TOKEN, "0")]);
        entry.retain(|h| !h.matches(token));
        entry.push(WalletHolding::new(token, balance));
    }

    /// Hold every fetch for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_with(&self, error: Option<GateError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceOracle for FakeOracle {
    async fn fetch_holdings(&self, wallet: &str) -> Result<Vec<WalletHolding>, GateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .holdings
            .lock()
            .unwrap()
            .get(wallet)
            .cloned()
            .unwrap_or_else(|| vec![WalletHolding::new(NATIVE_TOKEN, "0")]))
    }
}

/// Page store over two in-memory maps
#[derive(Default)]
pub(crate) struct MemoryPages {
    pages: Mutex<HashMap<String, Page>>,
    links: Mutex<HashMap<(String, String), Link>>,
    reads: AtomicUsize,
}

impl MemoryPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(&self, page: Page) {
        self.pages.lock().unwrap().insert(page.slug.clone(), page);
    }

    pub fn insert_link(&self, slug: &str, link: Link) {
        self.links
            .lock()
            .unwrap()
            .insert((slug.to_string(), link.id.clone()), link);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageStore for MemoryPages {
    async fn get_page(&self, slug: &str) -> Result<Option<Page>, GateError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.lock().unwrap().get(slug).cloned())
    }

    async fn get_link(&self, slug: &str, link_id: &str) -> Result<Option<Link>, GateError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .links
            .lock()
            .unwrap()
            .get(&(slug.to_string(), link_id.to_string()))
            .cloned())
    }
}

/// Forwards click events to a channel
pub(crate) struct ChannelClickSink(pub tokio::sync::mpsc::UnboundedSender<ClickEvent>);

#[async_trait]
impl ClickSink for ChannelClickSink {
    async fn record(&self, event: ClickEvent) -> anyhow::Result<()> {
        self.0.send(event)?;
        Ok(())
    }
}

/// Always fails
pub(crate) struct FailingClickSink;

#[async_trait]
impl ClickSink for FailingClickSink {
    async fn record(&self, _event: ClickEvent) -> anyhow::Result<()> {
        anyhow::bail!("click store offline")
    }
}
