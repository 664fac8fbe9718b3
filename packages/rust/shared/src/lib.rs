//! Shared types, error model, and configuration for boardsync.
//!
//! This crate is the foundation depended on by all other boardsync crates.
//! It provides:
//! - [`BoardSyncError`]: the unified error type
//! - Domain types ([`ContentRecord`], [`EventProposal`], [`ConfirmedEvent`], [`NoticeItem`])
//! - Configuration ([`AppConfig`], runtime configs, config loading)
//! - UTC+9 date helpers

pub mod config;
pub mod error;
pub mod time;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AdminSection, AppConfig, ConsensusConfig, ConsensusSection, CrawlConfig, CrawlSection,
    SelectorSection, SourceConfig, SourceSection, StorageSection, TranslateConfig,
    TranslationSection, config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_db_path, translation_api_key, validate_source,
};
pub use error::{BoardSyncError, Result};
pub use time::{kst, kst_date, kst_today};
pub use types::{
    ConfirmedEvent, ContentRecord, EventProposal, NoticeItem, Translation, UserProfile,
};
