// ============================================================================
// LinkDb record types
// ============================================================================

use serde::{Deserialize, Serialize};

/// Per-link click counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickCounter {
    pub total: u64,
    pub owner: u64,
    pub ungated: u64,
    pub token_holder: u64,
    /// Unix seconds of the latest click
    pub last_at: Option<i64>,
}

impl ClickCounter {
    pub fn bump(&mut self, grant_kind: &str, at: i64) {
        self.total += 1;
        match grant_kind {
            "owner" => self.owner += 1,
            "ungated" => self.ungated += 1,
            _ => self.token_holder += 1,
        }
        self.last_at = Some(self.last_at.map_or(at, |prev| prev.max(at)));
    }
}

/// Database statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbStats {
    pub total_pages: usize,
    pub total_links: usize,
    pub gated_links: usize,
    pub total_clicks: u64,
}
