//! Document Prompt Assembly
//!
//! Documents are usually far larger than a model's context window. Rather
//! than counting tokens, prompts are built from fixed character windows:
//!
//! - **Head window**: the first N characters, used for whole-document analysis.
//! - **Three windows**: head, middle (centred on `len / 2`) and tail, used
//!   for questions so the model sees every part of the document.
//!
//! Windows are measured in characters, not bytes, and clamp to the text:
//! a text shorter than the window is returned whole.
//!
//! Turning a file into text is not done here; a [`TextExtractor`] supplied
//! by the embedding application does that.

use std::path::Path;

use async_trait::async_trait;

/// Document text handed in by the caller
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentContext {
    /// Full extracted text
    pub full_text: String,
    /// Analysis produced earlier for this document, if any
    pub derived_analysis: Option<String>,
}

impl DocumentContext {
    /// Wrap extracted text
    pub fn new(full_text: impl Into<String>) -> Self {
        Self {
            full_text: full_text.into(),
            derived_analysis: None,
        }
    }

    /// Attach an earlier analysis
    #[must_use]
    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.derived_analysis = Some(analysis.into());
        self
    }
}

/// Head, middle and tail slices of a document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Windows<'a> {
    /// First window
    pub head: &'a str,
    /// Window centred on the middle character
    pub middle: &'a str,
    /// Last window
    pub tail: &'a str,
}

/// Byte offset of the `char_index`-th character, clamped to the end
fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map_or(text.len(), |(offset, _)| offset)
}

/// Characters `[start, start + len)` of `text`, clamped to its bounds
#[must_use]
pub fn char_slice(text: &str, start: usize, len: usize) -> &str {
    let begin = byte_offset(text, start);
    let end = begin + byte_offset(&text[begin..], len);
    &text[begin..end]
}

/// The first `window` characters of `text`
#[must_use]
pub fn head_window(text: &str, window: usize) -> &str {
    char_slice(text, 0, window)
}

/// Head, middle and tail windows of `window` characters each
#[must_use]
pub fn three_windows(text: &str, window: usize) -> Windows<'_> {
    let total = text.chars().count();
    let middle_start = (total / 2).saturating_sub(window / 2);

    Windows {
        head: char_slice(text, 0, window),
        middle: char_slice(text, middle_start, window),
        tail: char_slice(text, total.saturating_sub(window), window),
    }
}

/// Prompt asking for a first-pass analysis of a document
#[must_use]
pub fn analysis_prompt(document: &DocumentContext, window: usize) -> String {
    format!(
        "I have extracted text from a document. Please:\n\
         1. Identify the document type\n\
         2. Summarize the key points\n\
         3. Extract any important dates, names, or numerical data\n\
         \n\
         Here is the extracted text:\n\
         {}",
        head_window(&document.full_text, window)
    )
}

/// Prompt asking `question` about a document, sampled in three windows
#[must_use]
pub fn question_prompt(document: &DocumentContext, question: &str, window: usize) -> String {
    let windows = three_windows(&document.full_text, window);
    let mut prompt = format!(
        "Based on the following document text, please answer this question:\n\
         \n\
         QUESTION: {question}\n"
    );

    if let Some(ref analysis) = document.derived_analysis {
        prompt.push_str(&format!("\nEARLIER ANALYSIS:\n{analysis}\n"));
    }

    prompt.push_str(&format!(
        "\nDOCUMENT TEXT (beginning, first {window} characters):\n{}\n\
         \nDOCUMENT TEXT (middle {window} characters):\n{}\n\
         \nDOCUMENT TEXT (end, last {window} characters):\n{}\n\
         \nIf the answer is not in these excerpts, say so and suggest where in the document it may be.",
        windows.head, windows.middle, windows.tail
    ));
    prompt
}

// ============================================================================
// Text Extraction Seam
// ============================================================================

/// Failure to pull text out of a document file
#[derive(Debug, thiserror::Error)]
#[error("text extraction failed: {0}")]
pub struct ExtractError(pub String);

/// Turns a stored document file into plain text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract all text from the file at `path`
    async fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_head_window_clamps() {
        assert_eq!(head_window("short", 5000), "short");
        assert_eq!(head_window("abcdef", 3), "abc");
        assert_eq!(head_window("", 10), "");
    }

    #[test]
    fn test_three_windows_on_short_text() {
        let text = "x".repeat(100);
        let windows = three_windows(&text, 3000);

        assert_eq!(windows.head, text);
        assert_eq!(windows.middle, text);
        assert_eq!(windows.tail, text);
    }

    #[test]
    fn test_three_windows_positions() {
        let text: String = ('a'..='z').collect();
        let windows = three_windows(&text, 4);

        assert_eq!(windows.head, "abcd");
        // len 26, centre 13, start 11
        assert_eq!(windows.middle, "lmno");
        assert_eq!(windows.tail, "wxyz");
    }

    #[test]
    fn test_windows_count_characters_not_bytes() {
        let text = "héllo wörld ünïcode";
        assert_eq!(head_window(text, 5), "héllo");
        assert_eq!(three_windows(text, 4).tail, "code");
        assert_eq!(char_slice(text, 6, 5), "wörld");
    }

    #[test]
    fn test_analysis_prompt_uses_head_window() {
        let document = DocumentContext::new(format!("{}{}", "A".repeat(10), "B".repeat(10)));
        let prompt = analysis_prompt(&document, 10);

        assert!(prompt.contains("Identify the document type"));
        assert!(prompt.contains("AAAAAAAAAA"));
        assert!(!prompt.contains('B'));
    }

    #[test]
    fn test_question_prompt_labels_sections() {
        let document = DocumentContext::new("start middle end").with_analysis("a contract");
        let prompt = question_prompt(&document, "Who signed?", 3000);

        assert!(prompt.contains("QUESTION: Who signed?"));
        assert!(prompt.contains("EARLIER ANALYSIS:\na contract"));
        assert!(prompt.contains("DOCUMENT TEXT (beginning"));
        assert!(prompt.contains("DOCUMENT TEXT (middle"));
        assert!(prompt.contains("DOCUMENT TEXT (end"));
        assert_eq!(prompt.matches("start middle end").count(), 3);
    }
}
