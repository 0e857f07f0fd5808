//! Content sanitizer — normalizes a candidate payload before admission.
//!
//! Pipeline per text field: strip dangerous markup blocks, escape residual
//! markup, collapse redundant whitespace, then truncate to the configured
//! cap. Truncation is a distinct, earlier step from the hard
//! `max_entry_bytes` admission check, which rejects rather than truncates.
//! The caller's input is never mutated in place; a fresh document and its
//! computed byte size are returned.

use tracing::debug;

use crate::config::SanitizerConfig;
use crate::error::{EngramError, Result};
use crate::types::MemoryContent;

/// Markup elements whose entire block (tag and contents) is removed.
const DANGEROUS_TAGS: [&str; 3] = ["script", "style", "iframe"];

/// A sanitized content document plus its durable byte size.
#[derive(Debug, Clone)]
pub struct SanitizedContent {
    /// The cleaned document.
    pub content: MemoryContent,
    /// Size in bytes of the serialized document. This is the value that
    /// counts against `max_entry_bytes` and `max_total_bytes`.
    pub byte_size: u64,
}

/// Normalizes candidate payloads and computes their durable byte size.
#[derive(Debug, Clone)]
pub struct ContentSanitizer {
    config: SanitizerConfig,
}

impl ContentSanitizer {
    /// Create a sanitizer with the given truncation caps.
    #[must_use]
    pub fn new(config: SanitizerConfig) -> Self {
        Self { config }
    }

    /// Sanitize a candidate document.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Validation`] if the body is empty after
    /// cleaning, or [`EngramError::Serialization`] if the document cannot
    /// be serialized to compute its byte size.
    pub fn sanitize(&self, input: &MemoryContent) -> Result<SanitizedContent> {
        let body = truncate_bytes(&clean_text(&input.body), self.config.max_body_bytes);
        if body.is_empty() {
            return Err(EngramError::Validation {
                reason: "content body is empty after sanitization".to_string(),
            });
        }

        let title = input
            .title
            .as_deref()
            .map(|t| truncate_chars(&clean_text(t), self.config.max_title_chars))
            .filter(|t| !t.is_empty());
        let snippet = input
            .snippet
            .as_deref()
            .map(|s| truncate_chars(&clean_text(s), self.config.max_snippet_chars))
            .filter(|s| !s.is_empty());

        let attributes = input
            .attributes
            .iter()
            .map(|(k, v)| (clean_text(k), clean_text(v)))
            .filter(|(k, _)| !k.is_empty())
            .collect();

        let content = MemoryContent {
            title,
            body,
            snippet,
            attributes,
        };

        let serialized = serde_json::to_vec(&content)
            .map_err(|e| EngramError::Serialization(e.to_string()))?;
        let byte_size = serialized.len() as u64;

        debug!(
            raw_body_bytes = input.body.len(),
            byte_size, "Sanitized content document"
        );

        Ok(SanitizedContent { content, byte_size })
    }
}

// ---------------------------------------------------------------------------
// Text cleaning steps
// ---------------------------------------------------------------------------

/// Strip → escape → collapse, in that order. Escaping runs after block
/// stripping so a stripped region cannot re-expose markup, and collapsing
/// runs last so escaping never reintroduces runs of whitespace.
fn clean_text(text: &str) -> String {
    collapse_whitespace(&escape_markup(&strip_dangerous_blocks(text)))
}

/// Case-insensitive substring search starting at `from` (byte offset).
fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < from + n.len() {
        return None;
    }
    (from..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Remove `<script>`, `<style>` and `<iframe>` blocks including their
/// contents. An unterminated block is dropped through the end of input;
/// everything after the opening tag is presumed payload of that element.
fn strip_dangerous_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;

    while pos < text.len() {
        // Earliest opening tag of any dangerous element at or after `pos`.
        let mut next: Option<(usize, &str)> = None;
        for tag in DANGEROUS_TAGS {
            let mut search_from = pos;
            while let Some(i) = find_ci(text, "<", search_from) {
                let Some(j) = find_ci(text, tag, i + 1) else {
                    break;
                };
                if j != i + 1 {
                    // `<` not immediately followed by the tag name; try the
                    // next `<`.
                    search_from = i + 1;
                    continue;
                }
                let after = j + tag.len();
                let delimited = text
                    .as_bytes()
                    .get(after)
                    .is_none_or(|&b| b == b'>' || b == b'/' || b.is_ascii_whitespace());
                if delimited {
                    if next.is_none_or(|(best, _)| i < best) {
                        next = Some((i, tag));
                    }
                    break;
                }
                search_from = i + 1;
            }
        }

        let Some((start, tag)) = next else {
            out.push_str(&text[pos..]);
            break;
        };
        out.push_str(&text[pos..start]);

        let close = format!("</{tag}");
        pos = match find_ci(text, &close, start) {
            Some(c) => match find_ci(text, ">", c + close.len()) {
                Some(end) => end + 1,
                None => text.len(),
            },
            None => text.len(),
        };
    }

    out
}

/// Escape residual markup so it cannot be reinterpreted as executable
/// content downstream.
fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Collapse runs of whitespace to a single space and trim the ends.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_gap = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_gap = true;
        } else {
            if in_gap && !out.is_empty() {
                out.push(' ');
            }
            in_gap = false;
            out.push(ch);
        }
    }
    out
}

/// Truncate to at most `max` bytes, backing off to a char boundary.
fn truncate_bytes(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].trim_end().to_string()
}

/// Truncate to at most `max` characters.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
