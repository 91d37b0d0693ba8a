// ============================================================================
// LinkDb - Embedded page and link store (redb)
// ============================================================================
// Pages, their links, and per-link click counters.
// Default path: ~/.linkgate/links.redb (override via LINKGATE_DB_PATH env var)
// ============================================================================

pub mod types;

pub use types::{ClickCounter, DbStats};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::resolver::{ClickEvent, ClickSink, PageStore};
use crate::types::{GateError, Link, Page};

// Table definitions
const PAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("pages");
const LINKS: TableDefinition<&str, &[u8]> = TableDefinition::new("links");
const CLICKS: TableDefinition<&str, &[u8]> = TableDefinition::new("clicks");

/// Separator between page slug and link id in link/click keys
const KEY_SEPARATOR: char = ':';

/// `~/.linkgate`, created on first use
pub fn default_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
    let dir = home.join(".linkgate");
    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow!("Failed to create .linkgate directory: {}", e))?;
    Ok(dir)
}

fn link_key(slug: &str, link_id: &str) -> String {
    format!("{}{}{}", slug, KEY_SEPARATOR, link_id)
}

fn link_prefix(slug: &str) -> String {
    format!("{}{}", slug, KEY_SEPARATOR)
}

fn check_key_part(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains(KEY_SEPARATOR) {
        return Err(anyhow!(
            "Invalid {} '{}': must be non-empty and free of '{}'",
            kind,
            value,
            KEY_SEPARATOR
        ));
    }
    Ok(())
}

/// Embedded database for pages and links
pub struct LinkDb {
    db: Database,
    path: PathBuf,
}

impl LinkDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses LINKGATE_DB_PATH env var or ~/.linkgate/links.redb
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let db_path = match path {
            Some(p) => p.to_path_buf(),
            None => match std::env::var("LINKGATE_DB_PATH") {
                Ok(env_path) => PathBuf::from(env_path),
                Err(_) => default_data_dir()?.join("links.redb"),
            },
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(PAGES)
                .map_err(|e| anyhow!("Failed to create pages table: {}", e))?;
            let _ = write_txn
                .open_table(LINKS)
                .map_err(|e| anyhow!("Failed to create links table: {}", e))?;
            let _ = write_txn
                .open_table(CLICKS)
                .map_err(|e| anyhow!("Failed to create clicks table: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        info!("Database ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Page Operations
    // ========================================================================

    pub fn put_page(&self, page: &Page) -> Result<()> {
        check_key_part("page slug", &page.slug)?;
        let value = bincode::serialize(page)
            .map_err(|e| anyhow!("Failed to serialize page: {}", e))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(PAGES)
                .map_err(|e| anyhow!("Failed to open pages table: {}", e))?;
            table
                .insert(page.slug.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert page: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored page: {}", page.slug);
        Ok(())
    }

    pub fn get_page(&self, slug: &str) -> Result<Option<Page>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(PAGES)
            .map_err(|e| anyhow!("Failed to open pages table: {}", e))?;

        match table
            .get(slug)
            .map_err(|e| anyhow!("Failed to get page: {}", e))?
        {
            Some(value) => {
                let page: Page = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize page: {}", e))?;
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    pub fn list_pages(&self) -> Result<Vec<Page>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(PAGES)
            .map_err(|e| anyhow!("Failed to open pages table: {}", e))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate pages: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let page: Page = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize page: {}", e))?;
            results.push(page);
        }
        Ok(results)
    }

    /// Delete a page together with its links and click counters
    pub fn delete_page(&self, slug: &str) -> Result<bool> {
        let prefix = link_prefix(slug);

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        let mut removed_links = 0;
        {
            let mut pages = write_txn
                .open_table(PAGES)
                .map_err(|e| anyhow!("Failed to open pages table: {}", e))?;
            removed = pages
                .remove(slug)
                .map_err(|e| anyhow!("Failed to remove page: {}", e))?
                .is_some();

            let mut links = write_txn
                .open_table(LINKS)
                .map_err(|e| anyhow!("Failed to open links table: {}", e))?;
            for key in keys_with_prefix(&links, &prefix)? {
                links
                    .remove(key.as_str())
                    .map_err(|e| anyhow!("Failed to remove link {}: {}", key, e))?;
                removed_links += 1;
            }

            let mut clicks = write_txn
                .open_table(CLICKS)
                .map_err(|e| anyhow!("Failed to open clicks table: {}", e))?;
            for key in keys_with_prefix(&clicks, &prefix)? {
                clicks
                    .remove(key.as_str())
                    .map_err(|e| anyhow!("Failed to remove click counter {}: {}", key, e))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            debug!("Deleted page {} and {} links", slug, removed_links);
        }
        Ok(removed)
    }

    // ========================================================================
    // Link Operations
    // ========================================================================

    /// Store a link on an existing page. The URL must already be sealed.
    pub fn put_link(&self, slug: &str, link: &Link) -> Result<()> {
        check_key_part("link id", &link.id)?;
        if self.get_page(slug)?.is_none() {
            return Err(anyhow!("Page not found: {}", slug));
        }

        let key = link_key(slug, &link.id);
        let value = bincode::serialize(link)
            .map_err(|e| anyhow!("Failed to serialize link: {}", e))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(LINKS)
                .map_err(|e| anyhow!("Failed to open links table: {}", e))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert link: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored link: {}", key);
        Ok(())
    }

    pub fn get_link(&self, slug: &str, link_id: &str) -> Result<Option<Link>> {
        let key = link_key(slug, link_id);

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(LINKS)
            .map_err(|e| anyhow!("Failed to open links table: {}", e))?;

        match table
            .get(key.as_str())
            .map_err(|e| anyhow!("Failed to get link: {}", e))?
        {
            Some(value) => {
                let link: Link = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize link: {}", e))?;
                Ok(Some(link))
            }
            None => Ok(None),
        }
    }

    /// Links of a page in display order
    pub fn list_links(&self, slug: &str) -> Result<Vec<Link>> {
        let prefix = link_prefix(slug);

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(LINKS)
            .map_err(|e| anyhow!("Failed to open links table: {}", e))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(prefix.as_str()..)
            .map_err(|e| anyhow!("Failed to iterate links: {}", e))?;
        for entry in iter {
            let (key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let link: Link = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize link: {}", e))?;
            results.push(link);
        }

        results.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }

    pub fn delete_link(&self, slug: &str, link_id: &str) -> Result<bool> {
        let key = link_key(slug, link_id);

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(LINKS)
                .map_err(|e| anyhow!("Failed to open links table: {}", e))?;
            removed = table
                .remove(key.as_str())
                .map_err(|e| anyhow!("Failed to remove link: {}", e))?
                .is_some();

            let mut clicks = write_txn
                .open_table(CLICKS)
                .map_err(|e| anyhow!("Failed to open clicks table: {}", e))?;
            clicks
                .remove(key.as_str())
                .map_err(|e| anyhow!("Failed to remove click counter: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            debug!("Deleted link: {}", key);
        }
        Ok(removed)
    }

    // ========================================================================
    // Click Counters
    // ========================================================================

    /// Count one click; returns the link's new total
    pub fn record_click(&self, event: &ClickEvent) -> Result<u64> {
        let key = link_key(&event.page_slug, &event.link_id);

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let total;
        {
            let mut table = write_txn
                .open_table(CLICKS)
                .map_err(|e| anyhow!("Failed to open clicks table: {}", e))?;

            let mut counter = match table
                .get(key.as_str())
                .map_err(|e| anyhow!("Failed to get click counter: {}", e))?
            {
                Some(value) => bincode::deserialize::<ClickCounter>(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize click counter: {}", e))?,
                None => ClickCounter::default(),
            };
            counter.bump(event.grant.kind(), event.at);
            total = counter.total;

            let value = bincode::serialize(&counter)
                .map_err(|e| anyhow!("Failed to serialize click counter: {}", e))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert click counter: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        Ok(total)
    }

    pub fn click_counter(&self, slug: &str, link_id: &str) -> Result<Option<ClickCounter>> {
        let key = link_key(slug, link_id);

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(CLICKS)
            .map_err(|e| anyhow!("Failed to open clicks table: {}", e))?;

        match table
            .get(key.as_str())
            .map_err(|e| anyhow!("Failed to get click counter: {}", e))?
        {
            Some(value) => {
                let counter: ClickCounter = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize click counter: {}", e))?;
                Ok(Some(counter))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;

        let pages = read_txn
            .open_table(PAGES)
            .map_err(|e| anyhow!("Failed to open pages table: {}", e))?;
        let total_pages = pages
            .range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate pages: {}", e))?
            .count();

        let links = read_txn
            .open_table(LINKS)
            .map_err(|e| anyhow!("Failed to open links table: {}", e))?;
        let mut total_links = 0;
        let mut gated_links = 0;
        for entry in links
            .range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate links: {}", e))?
        {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let link: Link = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize link: {}", e))?;
            total_links += 1;
            if link.token_gated {
                gated_links += 1;
            }
        }

        let clicks = read_txn
            .open_table(CLICKS)
            .map_err(|e| anyhow!("Failed to open clicks table: {}", e))?;
        let mut total_clicks = 0;
        for entry in clicks
            .range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate clicks: {}", e))?
        {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let counter: ClickCounter = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize click counter: {}", e))?;
            total_clicks += counter.total;
        }

        Ok(DbStats {
            total_pages,
            total_links,
            gated_links,
            total_clicks,
        })
    }
}

fn keys_with_prefix<T>(table: &T, prefix: &str) -> Result<Vec<String>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut keys = Vec::new();
    let iter = table
        .range::<&str>(prefix..)
        .map_err(|e| anyhow!("Failed to iterate: {}", e))?;
    for entry in iter {
        let (key, _value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
        if !key.value().starts_with(prefix) {
            break;
        }
        keys.push(key.value().to_string());
    }
    Ok(keys)
}

#[async_trait]
impl PageStore for LinkDb {
    async fn get_page(&self, slug: &str) -> Result<Option<Page>, GateError> {
        LinkDb::get_page(self, slug).map_err(|e| GateError::Store(e.to_string()))
    }

    async fn get_link(&self, slug: &str, link_id: &str) -> Result<Option<Link>, GateError> {
        LinkDb::get_link(self, slug, link_id).map_err(|e| GateError::Store(e.to_string()))
    }
}

#[async_trait]
impl ClickSink for LinkDb {
    async fn record(&self, event: ClickEvent) -> Result<()> {
        self.record_click(&event)?;
        Ok(())
    }
}
