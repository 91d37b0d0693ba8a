// ============================================================================
// linkgate - Operator CLI for token-gated links
// ============================================================================
// Usage:
//   linkgate encrypt <url>                      Seal a URL with the server secret
//   linkgate page put --slug S --owner W        Create or update a page
//   linkgate link put --page S --id L ...       Store a (sealed) link
//   linkgate resolve <page> <link> --wallet W   Resolve a link for a visitor
//   linkgate holdings <wallet> [--refresh]      Inspect cached holdings
//   linkgate purge                              Drop expired cache entries
//   linkgate stats                              Show database statistics
// ============================================================================

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use linkgate_core::cipher::looks_encrypted;
use linkgate_core::{
    GateConfig, LinkDb, LinkDraft, LinkGate, Page, RedbKv, UrlCipher, WalletAddress,
    NATIVE_TOKEN,
};

/// Token-gated link resolver
#[derive(Parser)]
#[command(name = "linkgate", version, about = "Manage and resolve token-gated links")]
struct Cli {
    /// Path to the link database (default: ~/.linkgate/links.redb)
    #[arg(long, global = true, env = "LINKGATE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Path to the holdings cache (default: ~/.linkgate/cache.redb)
    #[arg(long, global = true, env = "LINKGATE_CACHE_PATH")]
    cache_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a URL into a salt:iv:ciphertext record
    Encrypt { url: String },

    /// Decrypt a record produced by `encrypt`
    Decrypt { record: String },

    /// Report whether text looks like, and is, a record under this secret
    Probe { text: String },

    /// Manage pages
    Page {
        #[command(subcommand)]
        action: PageCommand,
    },

    /// Manage links
    Link {
        #[command(subcommand)]
        action: LinkCommand,
    },

    /// Resolve a link for a visitor
    Resolve {
        page: String,
        link: String,

        /// Visitor wallet verified by the login provider
        #[arg(long)]
        wallet: Option<String>,

        /// Force a holdings refresh (still rate-limited)
        #[arg(long)]
        check_again: bool,
    },

    /// Show a wallet's holdings
    Holdings {
        wallet: String,

        /// Fetch from the oracle without spending rate-limit budget
        #[arg(long)]
        refresh: bool,
    },

    /// Evaluate a wallet against a token threshold
    Check {
        wallet: String,
        token: String,
        amount: String,
    },

    /// Drop expired entries from the holdings cache
    Purge,

    /// Show database statistics
    Stats,
}

#[derive(Subcommand)]
enum PageCommand {
    /// Create or update a page
    Put {
        #[arg(long)]
        slug: String,

        /// Owner wallet (base58)
        #[arg(long)]
        owner: String,

        /// Connected token mint (or "native")
        #[arg(long)]
        token: Option<String>,
    },

    /// Show a page and its links
    Show { slug: String },

    /// Delete a page and all its links
    Delete { slug: String },
}

#[derive(Subcommand)]
enum LinkCommand {
    /// Create or update a link; gated URLs are encrypted before storage
    Put {
        #[arg(long)]
        page: String,

        #[arg(long)]
        id: String,

        #[arg(long, default_value = "website")]
        preset: String,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        gated: bool,

        /// Required token amount(s); only the first is enforced
        #[arg(long, num_args = 1..)]
        required: Vec<String>,

        #[arg(long, default_value = "0")]
        position: u32,
    },

    /// List a page's links in display order
    List { page: String },

    /// Delete a link
    Delete { page: String, id: String },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_token(token: &str) -> Result<String> {
    if token.eq_ignore_ascii_case(NATIVE_TOKEN) {
        return Ok(NATIVE_TOKEN.to_string());
    }
    Ok(WalletAddress::parse(token)?.to_string())
}

struct App {
    db_path: Option<PathBuf>,
    cache_path: Option<PathBuf>,
}

impl App {
    fn db(&self) -> Result<Arc<LinkDb>> {
        Ok(Arc::new(LinkDb::open(self.db_path.as_deref())?))
    }

    fn config(&self) -> Result<GateConfig> {
        Ok(GateConfig::from_env()?)
    }

    fn cipher(&self) -> Result<UrlCipher> {
        Ok(UrlCipher::new(&self.config()?)?)
    }

    fn gate(&self, db: Arc<LinkDb>) -> Result<LinkGate> {
        let kv = Arc::new(RedbKv::open(self.cache_path.as_deref())?);
        Ok(LinkGate::with_helius(self.config()?, db.clone(), kv, db)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    // Logs go to stderr; stdout carries command output only
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("linkgate_core=warn".parse()?)
                .add_directive("linkgate=info".parse()?),
        )
        .init();

    if let Err(e) = dotenv {
        debug!("No .env loaded: {}", e);
    }

    let cli = Cli::parse();
    let app = App {
        db_path: cli.db_path,
        cache_path: cli.cache_path,
    };

    match cli.command {
        Commands::Encrypt { url } => {
            println!("{}", app.cipher()?.encrypt(&url)?);
            Ok(())
        }
        Commands::Decrypt { record } => {
            println!("{}", app.cipher()?.decrypt(&record)?);
            Ok(())
        }
        Commands::Probe { text } => {
            let cipher = app.cipher()?;
            print_json(&json!({
                "looks_encrypted": looks_encrypted(&text),
                "is_encrypted": cipher.is_encrypted(&text),
            }))
        }
        Commands::Page { action } => cmd_page(&app, action),
        Commands::Link { action } => cmd_link(&app, action),
        Commands::Resolve {
            page,
            link,
            wallet,
            check_again,
        } => cmd_resolve(&app, &page, &link, wallet.as_deref(), check_again).await,
        Commands::Holdings { wallet, refresh } => cmd_holdings(&app, &wallet, refresh).await,
        Commands::Check {
            wallet,
            token,
            amount,
        } => cmd_check(&app, &wallet, &token, &amount).await,
        Commands::Purge => {
            let kv = RedbKv::open(app.cache_path.as_deref())?;
            println!("Purged {} expired cache entries", kv.purge_expired()?);
            Ok(())
        }
        Commands::Stats => cmd_stats(&app),
    }
}

fn cmd_page(app: &App, action: PageCommand) -> Result<()> {
    let db = app.db()?;

    match action {
        PageCommand::Put { slug, owner, token } => {
            let owner = WalletAddress::parse(&owner)?;
            let connected_token = token.as_deref().map(parse_token).transpose()?;
            let now = Utc::now().timestamp();
            let created_at = db.get_page(&slug)?.map_or(now, |p| p.created_at);

            let page = Page {
                slug,
                owner_wallet: owner.to_string(),
                connected_token,
                created_at,
                updated_at: now,
            };
            db.put_page(&page)?;
            print_json(&page)
        }
        PageCommand::Show { slug } => {
            let page = db
                .get_page(&slug)?
                .ok_or_else(|| anyhow!("Page not found: {}", slug))?;
            let links = db.list_links(&slug)?;

            println!("Page:    {}", page.slug);
            println!("Owner:   {}", page.owner_wallet);
            println!("Token:   {}", page.connected_token().unwrap_or("-"));
            println!("Created: {}", format_timestamp(page.created_at));
            println!("Updated: {}", format_timestamp(page.updated_at));
            println!();
            println!(
                "{:<4}  {:<20}  {:<12}  {:<6}  {:<10}  {}",
                "POS", "LINK ID", "PRESET", "GATED", "REQUIRED", "CLICKS"
            );
            println!("{}", "-".repeat(70));
            for link in &links {
                let clicks = db
                    .click_counter(&slug, &link.id)?
                    .map_or(0, |c| c.total);
                println!(
                    "{:<4}  {:<20}  {:<12}  {:<6}  {:<10}  {}",
                    link.position,
                    link.id,
                    link.preset_id,
                    if link.token_gated { "yes" } else { "no" },
                    link.required_amount().unwrap_or("-"),
                    clicks
                );
            }
            println!("\nTotal: {} links", links.len());
            Ok(())
        }
        PageCommand::Delete { slug } => {
            if db.delete_page(&slug)? {
                println!("Deleted page {}", slug);
            } else {
                println!("Page not found: {}", slug);
            }
            Ok(())
        }
    }
}

fn cmd_link(app: &App, action: LinkCommand) -> Result<()> {
    let db = app.db()?;

    match action {
        LinkCommand::Put {
            page,
            id,
            preset,
            url,
            gated,
            required,
            position,
        } => {
            let link = linkgate_core::seal_link(
                LinkDraft {
                    id,
                    preset_id: preset,
                    url,
                    token_gated: gated,
                    required_tokens: required,
                    position,
                },
                &app.cipher()?,
            )?;
            db.put_link(&page, &link)?;
            print_json(&link)
        }
        LinkCommand::List { page } => print_json(&db.list_links(&page)?),
        LinkCommand::Delete { page, id } => {
            if db.delete_link(&page, &id)? {
                println!("Deleted link {}/{}", page, id);
            } else {
                println!("Link not found: {}/{}", page, id);
            }
            Ok(())
        }
    }
}

async fn cmd_resolve(
    app: &App,
    page: &str,
    link: &str,
    wallet: Option<&str>,
    check_again: bool,
) -> Result<()> {
    let gate = app.gate(app.db()?)?;
    let visitor = wallet.map(WalletAddress::parse).transpose()?;

    let resolution = if check_again {
        let mut session = gate.open(page, link, visitor).await?;
        gate.check_again(&mut session).await
    } else {
        gate.resolve(page, link, visitor).await?
    };

    gate.shutdown().await;
    print_json(&resolution)
}

async fn cmd_holdings(app: &App, wallet: &str, refresh: bool) -> Result<()> {
    let wallet = WalletAddress::parse(wallet)?;
    let gate = app.gate(app.db()?)?;

    let snapshot = if refresh {
        gate.cache().refresh_unthrottled(wallet.as_str()).await?
    } else {
        gate.cache().get_holdings(wallet.as_str(), false).await?
    };
    print_json(&snapshot)
}

async fn cmd_check(app: &App, wallet: &str, token: &str, amount: &str) -> Result<()> {
    let wallet = WalletAddress::parse(wallet)?;
    let token = parse_token(token)?;
    let gate = app.gate(app.db()?)?;

    let decision = gate.evaluate(&wallet, &token, amount).await?;
    let summary = decision.summary();
    print_json(&json!({
        "decision": decision,
        "summary": summary,
    }))
}

fn cmd_stats(app: &App) -> Result<()> {
    let db = app.db()?;
    let stats = db.stats()?;
    let kv = RedbKv::open(app.cache_path.as_deref())?;
    let (live, total) = kv.stats()?;

    println!("=== Linkgate Database Stats ===");
    println!("Database: {}", db.path().display());
    println!("Cache:    {}", kv.path().display());
    println!();
    println!("Pages:    {}", stats.total_pages);
    println!("Links:    {} ({} gated)", stats.total_links, stats.gated_links);
    println!("Clicks:   {}", stats.total_clicks);
    println!("Cache:    {} live / {} stored keys", live, total);

    Ok(())
}
