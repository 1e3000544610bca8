//! Message validation gate.
//!
//! Pure function, no side effects: runs before any state mutation so no
//! partial conversation state exists for rejected input.

use crate::chat::core::config::ValidationConfig;
use crate::chat::core::errors::ValidationError;

/// Content that passed validation, ready to enter the pipeline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidatedContent(String);

impl ValidatedContent {
    /// Borrow as `&str`.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into `String`.
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for ValidatedContent {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Validate user message content against the configured limits.
///
/// Rules:
/// - Non-empty after trimming (whitespace-only input is rejected).
/// - At most `max_content_chars` Unicode code points; the error carries the
///   actual and maximum lengths.
///
/// The accepted content is preserved verbatim, not trimmed.
///
/// # Errors
/// Returns `ValidationError` if the content is empty or too long.
pub fn validate_content(
    content: &str,
    config: &ValidationConfig,
) -> Result<ValidatedContent, ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    let actual = content.chars().count();
    if actual > config.max_content_chars {
        return Err(ValidationError::ContentTooLong {
            actual,
            max: config.max_content_chars,
        });
    }

    Ok(ValidatedContent(content.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ValidationConfig {
        ValidationConfig::default()
    }

    #[test]
    fn test_accepts_normal_content() {
        let validated = validate_content("Buy milk", &config()).unwrap();
        assert_eq!(validated.as_str(), "Buy milk");
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(validate_content("", &config()), Err(ValidationError::Empty));
    }

    #[test]
    fn test_rejects_whitespace_only() {
        assert_eq!(
            validate_content(" \t\n ", &config()),
            Err(ValidationError::Empty)
        );
    }

    #[test]
    fn test_exact_limit_accepted() {
        let content = "a".repeat(2000);
        assert!(validate_content(&content, &config()).is_ok());
    }

    #[test]
    fn test_one_over_limit_rejected() {
        let content = "a".repeat(2001);
        assert_eq!(
            validate_content(&content, &config()),
            Err(ValidationError::ContentTooLong {
                actual: 2001,
                max: 2000
            })
        );
    }

    #[test]
    fn test_counts_code_points_not_bytes() {
        // 2000 multibyte characters are within the limit even though the
        // byte length is far larger.
        let content = "é".repeat(2000);
        assert!(content.len() > 2000);
        assert!(validate_content(&content, &config()).is_ok());
    }

    #[test]
    fn test_content_preserved_verbatim() {
        let validated = validate_content("  padded  ", &config()).unwrap();
        assert_eq!(validated.into_string(), "  padded  ");
    }
}
