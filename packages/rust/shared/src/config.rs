//! Application configuration for boardsync.
//!
//! User config lives at `~/.boardsync/boardsync.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BoardSyncError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "boardsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".boardsync";

// ---------------------------------------------------------------------------
// Config structs (matching boardsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Notice-board source and HTML structure.
    #[serde(default)]
    pub source: SourceSection,

    /// Identity that authors crawled records.
    #[serde(default)]
    pub admin: AdminSection,

    /// Crawl/probe worker settings.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// Translation capability settings.
    #[serde(default)]
    pub translation: TranslationSection,

    /// Consensus merge settings.
    #[serde(default)]
    pub consensus: ConsensusSection,

    /// Local store.
    #[serde(default)]
    pub storage: StorageSection,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Listing page that is crawled on every run.
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Origin prepended to relative detail and image links.
    #[serde(default = "default_origin_url")]
    pub origin_url: String,

    /// Markers removed from listing titles ("edited", "new").
    #[serde(default = "default_title_markers")]
    pub title_markers: Vec<String>,

    /// CSS selectors for the listing and detail pages.
    #[serde(default)]
    pub selectors: SelectorSection,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            origin_url: default_origin_url(),
            title_markers: default_title_markers(),
            selectors: SelectorSection::default(),
        }
    }
}

fn default_listing_url() -> String {
    "https://www.dic.hanyang.ac.kr/front/student/notice?page=1&per-page=6".into()
}
fn default_origin_url() -> String {
    "https://www.dic.hanyang.ac.kr".into()
}
fn default_title_markers() -> Vec<String> {
    vec!["수정됨".into(), "새 글".into()]
}

/// `[source.selectors]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorSection {
    /// One element per listing row.
    #[serde(default = "default_list_item")]
    pub list_item: String,
    /// Title element inside a row.
    #[serde(default = "default_item_title")]
    pub item_title: String,
    /// Link element inside a row.
    #[serde(default = "default_item_link")]
    pub item_link: String,
    /// Element whose presence marks the row as a pinned notice.
    #[serde(default = "default_notice_marker")]
    pub notice_marker: String,
    /// Publish timestamp on a detail page.
    #[serde(default = "default_published_at")]
    pub published_at: String,
    /// Body container on a detail page.
    #[serde(default = "default_body")]
    pub body: String,
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self {
            list_item: default_list_item(),
            item_title: default_item_title(),
            item_link: default_item_link(),
            notice_marker: default_notice_marker(),
            published_at: default_published_at(),
            body: default_body(),
        }
    }
}

fn default_list_item() -> String {
    "ul.board-default-list > li".into()
}
fn default_item_title() -> String {
    "span.subject".into()
}
fn default_item_link() -> String {
    "a[href]".into()
}
fn default_notice_marker() -> String {
    "a div.first span.notice".into()
}
fn default_published_at() -> String {
    "span.datetime".into()
}
fn default_body() -> String {
    "div.content".into()
}

/// `[admin]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSection {
    /// User id stamped on crawled records.
    #[serde(default = "default_admin_id")]
    pub id: String,
    /// Nickname stamped on crawled records.
    #[serde(default = "default_admin_nickname")]
    pub nickname: String,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            id: default_admin_id(),
            nickname: default_admin_nickname(),
        }
    }
}

fn default_admin_id() -> String {
    "5e538166ae5af8553c58a4dc".into()
}
fn default_admin_nickname() -> String {
    "admin".into()
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Concurrent detail fetches / liveness probes.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Skip items whose source URL is already stored.
    #[serde(default)]
    pub dedupe_source_urls: bool,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            dedupe_source_urls: false,
        }
    }
}

fn default_concurrency() -> u32 {
    4
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[translation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationSection {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Translation REST endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Target languages, translated in this order by the daily job.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Concurrent translation requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl Default for TranslationSection {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            endpoint: default_endpoint(),
            languages: default_languages(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_api_key_env() -> String {
    "GOOGLE_TRANSLATE_API_KEY".into()
}
fn default_endpoint() -> String {
    "https://translation.googleapis.com/language/translate/v2".into()
}
fn default_languages() -> Vec<String> {
    vec!["en".into(), "zh".into()]
}

/// `[consensus]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSection {
    /// Minimum same-title proposals before a group is promoted.
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    /// Ranked start dates listed in a promoted event's contents.
    #[serde(default = "default_display_slots")]
    pub display_slots: usize,

    /// Seconds after which an unreleased merge claim may be taken over.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            display_slots: default_display_slots(),
            claim_lease_secs: default_claim_lease_secs(),
        }
    }
}

fn default_quorum() -> usize {
    2
}
fn default_display_slots() -> usize {
    2
}
fn default_claim_lease_secs() -> u64 {
    600
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Database file. A leading `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.boardsync/boardsync.db".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime source description used by the crawler.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub listing_url: String,
    pub origin_url: String,
    pub title_markers: Vec<String>,
    pub selectors: SelectorSection,
    pub admin_id: String,
    pub admin_nickname: String,
}

impl From<&AppConfig> for SourceConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            listing_url: config.source.listing_url.clone(),
            origin_url: config.source.origin_url.clone(),
            title_markers: config.source.title_markers.clone(),
            selectors: config.source.selectors.clone(),
            admin_id: config.admin.id.clone(),
            admin_nickname: config.admin.nickname.clone(),
        }
    }
}

/// Runtime crawl/probe configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Maximum concurrent HTTP requests.
    pub concurrency: u32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Skip items whose source URL is already stored.
    pub dedupe_source_urls: bool,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.crawl.concurrency.max(1),
            timeout_secs: config.crawl.timeout_secs,
            dedupe_source_urls: config.crawl.dedupe_source_urls,
        }
    }
}

/// Runtime translation configuration.
#[derive(Debug, Clone)]
pub struct TranslateConfig {
    pub endpoint: String,
    pub api_key_env: String,
    pub languages: Vec<String>,
    pub concurrency: u32,
    pub timeout_secs: u64,
}

impl From<&AppConfig> for TranslateConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            endpoint: config.translation.endpoint.clone(),
            api_key_env: config.translation.api_key_env.clone(),
            languages: config.translation.languages.clone(),
            concurrency: config.translation.concurrency.max(1),
            timeout_secs: config.crawl.timeout_secs,
        }
    }
}

/// Runtime consensus configuration.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    pub quorum: usize,
    pub display_slots: usize,
    pub claim_lease_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ConsensusConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            quorum: config.consensus.quorum.max(1),
            display_slots: config.consensus.display_slots,
            claim_lease_secs: config.consensus.claim_lease_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.boardsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BoardSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.boardsync/boardsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BoardSyncError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        BoardSyncError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BoardSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BoardSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BoardSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the configured database path, expanding a leading `~`.
pub fn resolve_db_path(config: &AppConfig) -> Result<PathBuf> {
    let raw = config.storage.db_path.as_str();
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| BoardSyncError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

/// Read the translation API key from the env var named in the config.
pub fn translation_api_key(config: &TranslateConfig) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(BoardSyncError::config(format!(
            "translation API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that origin and listing URLs parse.
pub fn validate_source(config: &AppConfig) -> Result<()> {
    for (name, value) in [
        ("source.listing_url", &config.source.listing_url),
        ("source.origin_url", &config.source.origin_url),
    ] {
        url::Url::parse(value)
            .map_err(|e| BoardSyncError::config(format!("{name} '{value}' is not a URL: {e}")))?;
    }
    Ok(())
}
