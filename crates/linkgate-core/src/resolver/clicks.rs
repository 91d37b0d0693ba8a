//! Click tracking for resolutions that hand out a URL

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::Grant;

/// One resolved click
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub page_slug: String,
    pub link_id: String,
    pub grant: Grant,
    /// Unix seconds
    pub at: i64,
}

impl ClickEvent {
    pub fn new(page_slug: &str, link_id: &str, grant: Grant) -> Self {
        Self {
            page_slug: page_slug.to_string(),
            link_id: link_id.to_string(),
            grant,
            at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Destination for click events. Failures are logged, never surfaced.
#[async_trait]
pub trait ClickSink: Send + Sync {
    async fn record(&self, event: ClickEvent) -> Result<()>;
}

/// Writes click events to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingClickSink;

#[async_trait]
impl ClickSink for TracingClickSink {
    async fn record(&self, event: ClickEvent) -> Result<()> {
        info!(
            "Click on {}/{} ({})",
            event.page_slug,
            event.link_id,
            event.grant.kind()
        );
        Ok(())
    }
}

/// Records clicks on background tasks so resolution never waits on the sink
pub(crate) struct ClickRecorder {
    sink: Arc<dyn ClickSink>,
    pending: Mutex<JoinSet<()>>,
}

impl ClickRecorder {
    pub fn new(sink: Arc<dyn ClickSink>) -> Self {
        Self {
            sink,
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn emit(&self, event: ClickEvent) {
        let sink = self.sink.clone();
        let task = async move {
            let page = event.page_slug.clone();
            let link = event.link_id.clone();
            if let Err(e) = sink.record(event).await {
                warn!("Failed to record click on {}/{}: {}", page, link, e);
            }
        };

        match self.pending.lock() {
            Ok(mut pending) => {
                // Reap finished tasks so the set stays small
                while pending.try_join_next().is_some() {}
                pending.spawn(task);
            }
            Err(_) => {
                tokio::spawn(task);
            }
        }
    }

    /// Wait for every click recorded so far
    pub async fn flush(&self) {
        let mut pending = match self.pending.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        while pending.join_next().await.is_some() {}
    }
}
