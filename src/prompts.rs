//! Fixed user-visible strings.
//!
//! Every string the pipeline writes into the conversation on its own behalf
//! lives here, so the wording can be changed in one place and tests can
//! compare against the constants instead of literals.

/// Decoded text shown when recognition succeeded but found nothing.
pub const NO_TEXT_SENTINEL: &str = "No text could be recognized.";

/// Decoded text shown for every [`crate::error::ExtractionError`].
pub const DECODE_ERROR_SENTINEL: &str = "Error decoding file.";

/// Reply appended when the chat backend fails for any reason.
pub const APOLOGY_REPLY: &str =
    "Sorry, I couldn't reach the assistant right now. Please try again in a moment.";

/// Reply appended when the backend answers with an (almost) empty generation.
pub const RETRY_PROMPT_REPLY: &str =
    "I didn't get a proper answer that time. Could you rephrase or send it again?";

/// Prefix of the prompt synthesised from a decoded file.
pub const FILE_PROMPT_PREFIX: &str = "Observe the contents of the text: ";

/// Notice appended when a submission exceeds the character ceiling.
pub fn oversize_notice(len: usize, max: usize) -> String {
    format!(
        "Your message is too long ({} characters). Please keep it under {} characters.",
        len, max
    )
}

/// Build the prompt that is submitted on behalf of a decoded file.
pub fn file_prompt(decoded: &str) -> String {
    format!("{}{}", FILE_PROMPT_PREFIX, decoded)
}

/// True for the two strings the extractor uses instead of real text.
pub fn is_sentinel(decoded: &str) -> bool {
    decoded == NO_TEXT_SENTINEL || decoded == DECODE_ERROR_SENTINEL
}
