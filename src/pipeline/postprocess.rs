//! Post-processing: turn raw recogniser output into one line of plain text.
//!
//! OCR output is full of layout artefacts (hard line breaks at every visual
//! line, form feeds between pages, runs of spaces from column gaps) that
//! carry no meaning once the text is pasted into a chat prompt. We collapse
//! all of it to single spaces and map an empty result to
//! [`Recognized::NoText`] instead of an error.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Outcome of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognized {
    /// Normalised, non-empty text.
    Text(String),
    /// Recognition ran but nothing usable came out.
    NoText,
}

impl Recognized {
    /// Text shown to the user: the text itself or the no-text sentinel.
    pub fn display_text(&self) -> &str {
        match self {
            Recognized::Text(t) => t,
            Recognized::NoText => crate::prompts::NO_TEXT_SENTINEL,
        }
    }
}

/// Collapse whitespace runs to one space and trim both ends.
pub fn normalize_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input, " ").trim().to_string()
}

/// Normalise and classify raw recogniser output.
pub fn finish(raw: &str) -> Recognized {
    let text = normalize_whitespace(raw);
    if text.is_empty() {
        Recognized::NoText
    } else {
        Recognized::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_all_whitespace_kinds() {
        assert_eq!(
            normalize_whitespace("  Hello\n\n  World\t\x0c again \r\n"),
            "Hello World again"
        );
    }

    #[test]
    fn empty_output_is_no_text() {
        assert_eq!(finish(""), Recognized::NoText);
        assert_eq!(finish(" \n\x0c\t "), Recognized::NoText);
    }

    #[test]
    fn display_text_uses_sentinel() {
        assert_eq!(Recognized::NoText.display_text(), "No text could be recognized.");
        assert_eq!(Recognized::Text("abc".into()).display_text(), "abc");
    }
}
