//! Packed 32-bit token metadata.
//!
//! Layout (least significant bit first):
//!
//! | bits  | field                       |
//! |-------|-----------------------------|
//! | 0-7   | language id                 |
//! | 8-9   | standard token type         |
//! | 10    | balanced-bracket flag       |
//! | 11-14 | font style                  |
//! | 15-23 | foreground color-table index|
//! | 24-31 | background color-table index|

use crate::textmate::scope::ScopeName;
use bitflags::bitflags;
use std::fmt;

const LANGUAGE_ID_MASK: u32 = 0b0000_0000_0000_0000_0000_0000_1111_1111;
const TOKEN_TYPE_MASK: u32 = 0b0000_0000_0000_0000_0000_0011_0000_0000;
const BALANCED_BRACKETS_MASK: u32 = 0b0000_0000_0000_0000_0000_0100_0000_0000;
const FONT_STYLE_MASK: u32 = 0b0000_0000_0000_0000_0111_1000_0000_0000;
const FOREGROUND_MASK: u32 = 0b0000_0000_1111_1111_1000_0000_0000_0000;
const BACKGROUND_MASK: u32 = 0b1111_1111_0000_0000_0000_0000_0000_0000;

const LANGUAGE_ID_OFFSET: u32 = 0;
const TOKEN_TYPE_OFFSET: u32 = 8;
const BALANCED_BRACKETS_OFFSET: u32 = 10;
const FONT_STYLE_OFFSET: u32 = 11;
const FOREGROUND_OFFSET: u32 = 15;
const BACKGROUND_OFFSET: u32 = 24;

/// Largest color-table index the foreground field can hold.
pub const MAX_FOREGROUND_INDEX: u32 = FOREGROUND_MASK >> FOREGROUND_OFFSET;
/// Largest color-table index the background field can hold.
pub const MAX_BACKGROUND_INDEX: u32 = BACKGROUND_MASK >> BACKGROUND_OFFSET;

bitflags! {
    /// Font style bits of a theme rule.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FontStyle: u8 {
        /// Italic.
        const ITALIC = 1;
        /// Bold.
        const BOLD = 2;
        /// Underline.
        const UNDERLINE = 4;
        /// Strikethrough.
        const STRIKETHROUGH = 8;
    }
}

impl FontStyle {
    /// Parse a theme `fontStyle` value such as `"italic bold"`. Unknown words are ignored.
    pub fn parse(value: &str) -> Self {
        value
            .split_whitespace()
            .fold(FontStyle::empty(), |style, word| match word {
                "italic" => style | FontStyle::ITALIC,
                "bold" => style | FontStyle::BOLD,
                "underline" => style | FontStyle::UNDERLINE,
                "strikethrough" => style | FontStyle::STRIKETHROUGH,
                _ => style,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
/// Small integer identifying a language in encoded tokens (0 means unknown).
pub struct LanguageId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
/// Coarse token classification used by bracket matching and auto-closing.
pub enum StandardTokenType {
    /// Anything else.
    #[default]
    Other = 0,
    /// Inside a comment.
    Comment = 1,
    /// Inside a string literal.
    String = 2,
    /// Inside a regular-expression literal.
    RegEx = 3,
}

impl StandardTokenType {
    fn from_bits(bits: u32) -> Self {
        match bits {
            1 => Self::Comment,
            2 => Self::String,
            3 => Self::RegEx,
            _ => Self::Other,
        }
    }

    /// Classify a single scope name by its segments (`comment`, `string`, `regex`).
    ///
    /// `meta.embedded` returns `Some(Other)` so embedded code inside a string resets the
    /// classification; scopes that say nothing return `None`.
    pub fn for_scope(scope: &str) -> Option<Self> {
        if scope == "meta.embedded" || scope.starts_with("meta.embedded.") {
            return Some(Self::Other);
        }
        scope.split('.').find_map(|segment| match segment {
            "comment" => Some(Self::Comment),
            "string" => Some(Self::String),
            "regex" => Some(Self::RegEx),
            _ => None,
        })
    }

    /// Classify a scope path; the innermost scope that says something wins.
    pub fn for_path(scopes: &[ScopeName]) -> Self {
        scopes
            .iter()
            .rev()
            .find_map(|s| Self::for_scope(s))
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
/// A packed token metadata word.
pub struct TokenMetadata(pub u32);

impl TokenMetadata {
    /// Pack the given fields. Color indices are truncated to their field width.
    pub fn new(
        language: LanguageId,
        token_type: StandardTokenType,
        balanced_brackets: bool,
        font_style: FontStyle,
        foreground: u32,
        background: u32,
    ) -> Self {
        let mut bits = (language.0 as u32) << LANGUAGE_ID_OFFSET;
        bits |= (token_type as u32) << TOKEN_TYPE_OFFSET;
        bits |= (balanced_brackets as u32) << BALANCED_BRACKETS_OFFSET;
        bits |= (font_style.bits() as u32) << FONT_STYLE_OFFSET;
        bits |= (foreground << FOREGROUND_OFFSET) & FOREGROUND_MASK;
        bits |= (background << BACKGROUND_OFFSET) & BACKGROUND_MASK;
        Self(bits)
    }

    /// The language id.
    pub fn language_id(self) -> LanguageId {
        LanguageId(((self.0 & LANGUAGE_ID_MASK) >> LANGUAGE_ID_OFFSET) as u8)
    }

    /// The standard token type.
    pub fn token_type(self) -> StandardTokenType {
        StandardTokenType::from_bits((self.0 & TOKEN_TYPE_MASK) >> TOKEN_TYPE_OFFSET)
    }

    /// Whether brackets inside this token take part in bracket matching.
    pub fn balanced_brackets(self) -> bool {
        self.0 & BALANCED_BRACKETS_MASK != 0
    }

    /// The font style bits.
    pub fn font_style(self) -> FontStyle {
        FontStyle::from_bits_truncate(((self.0 & FONT_STYLE_MASK) >> FONT_STYLE_OFFSET) as u8)
    }

    /// Foreground color-table index (0 means "use the default").
    pub fn foreground(self) -> u32 {
        (self.0 & FOREGROUND_MASK) >> FOREGROUND_OFFSET
    }

    /// Background color-table index (0 means "use the default").
    pub fn background(self) -> u32 {
        (self.0 & BACKGROUND_MASK) >> BACKGROUND_OFFSET
    }
}

impl fmt::Debug for TokenMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenMetadata")
            .field("language", &self.language_id().0)
            .field("token_type", &self.token_type())
            .field("font_style", &self.font_style())
            .field("foreground", &self.foreground())
            .field("background", &self.background())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// An encoded token: it starts at `start` and extends to the next token's start.
pub struct EncodedToken {
    /// Byte offset of the token start.
    pub start: usize,
    /// Packed metadata.
    pub metadata: TokenMetadata,
}

/// Append a token, merging it into the previous one when the metadata is the same.
pub(crate) fn push_encoded(tokens: &mut Vec<EncodedToken>, start: usize, metadata: TokenMetadata) {
    if tokens.last().is_some_and(|t| t.metadata == metadata) {
        return;
    }
    tokens.push(EncodedToken { start, metadata });
}
