//! Script-range language sampling.
//!
//! A body is sampled twice: at its first script character and around its
//! midpoint. Bodies whose two samples agree are treated as monolingual.

use std::fmt;

/// Width of the window checked at the midpoint sample.
const MIDDLE_WINDOW: usize = 10;

/// Languages the classifier can tell apart by script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Ko,
    En,
    Zh,
    Undetermined,
}

impl Language {
    /// ISO 639-1 code, or `und`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ko => "ko",
            Self::En => "en",
            Self::Zh => "zh",
            Self::Undetermined => "und",
        }
    }

    /// Parse an ISO 639-1 code. Unknown codes yield `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "ko" => Some(Self::Ko),
            "en" => Some(Self::En),
            "zh" | "zh-cn" | "zh-tw" => Some(Self::Zh),
            _ => None,
        }
    }

    /// Script range a single character belongs to.
    fn of_char(c: char) -> Self {
        match c {
            '\u{AC00}'..='\u{D7A3}' => Self::Ko,
            'A'..='Z' | 'a'..='z' => Self::En,
            '\u{4E00}'..='\u{9FFF}' => Self::Zh,
            _ => Self::Undetermined,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The two samples taken from a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageSample {
    pub start: Language,
    pub middle: Language,
}

impl LanguageSample {
    /// Both samples agree on a known language.
    pub fn is_monolingual(&self) -> bool {
        self.start == self.middle && self.start != Language::Undetermined
    }
}

/// Sample the language at the start and middle of `text`.
pub fn classify(text: &str) -> LanguageSample {
    let chars: Vec<char> = text.chars().collect();
    LanguageSample {
        start: start_language(&chars),
        middle: middle_language(&chars),
    }
}

fn start_language(chars: &[char]) -> Language {
    chars
        .iter()
        .map(|&c| Language::of_char(c))
        .find(|lang| *lang != Language::Undetermined)
        .unwrap_or(Language::Undetermined)
}

/// First offset at or after the midpoint whose character and following
/// window are entirely in one script.
fn middle_language(chars: &[char]) -> Language {
    for offset in chars.len() / 2..chars.len() {
        let lang = Language::of_char(chars[offset]);
        if lang == Language::Undetermined {
            continue;
        }
        let end = (offset + MIDDLE_WINDOW).min(chars.len());
        if chars[offset..end].iter().all(|&c| Language::of_char(c) == lang) {
            return lang;
        }
    }
    Language::Undetermined
}

/// Whether a body with this sample should be translated into `target`.
///
/// Titles are always translated; bodies only when monolingual and not
/// already in the target language.
pub fn should_translate_body(sample: &LanguageSample, target: &str) -> bool {
    sample.is_monolingual() && Language::from_code(target) != Some(sample.start)
}
