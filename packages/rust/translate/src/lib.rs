//! Language sampling and machine translation for boardsync.
//!
//! - [`classifier`]: start/middle script sampling and the body translation policy
//! - [`client`]: the [`Translate`] capability and its Google Cloud implementation

pub mod classifier;
pub mod client;

pub use classifier::{Language, LanguageSample, classify, should_translate_body};
pub use client::{GoogleTranslator, Translate};
