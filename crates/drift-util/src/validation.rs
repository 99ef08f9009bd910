use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("message is too long (max {max} characters)")]
    TooLong { max: usize },
    #[error("maximum {max} words allowed")]
    TooManyWords { max: usize },
}

/// Trim a raw message payload; `None` means the frame should be dropped
/// silently (client bug, not a user-facing error).
pub fn normalize_content(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Apply the character and word ceilings, in that order, to
/// already-normalized content.
pub fn check_content(content: &str, max_chars: usize, max_words: usize) -> Result<(), ContentError> {
    if content.chars().count() > max_chars {
        return Err(ContentError::TooLong { max: max_chars });
    }
    if word_count(content) > max_words {
        return Err(ContentError::TooManyWords { max: max_words });
    }
    Ok(())
}

pub fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_content_normalizes_to_none() {
        assert_eq!(normalize_content("   "), None);
        assert_eq!(normalize_content("\n\t"), None);
        assert_eq!(normalize_content("  hi  "), Some("hi"));
    }

    #[test]
    fn char_ceiling_applies_before_word_ceiling() {
        let long = "x".repeat(501);
        assert_eq!(
            check_content(&long, 500, 30),
            Err(ContentError::TooLong { max: 500 })
        );
    }

    #[test]
    fn word_ceiling_counts_whitespace_delimited_words() {
        let content = (0..31).map(|_| "w").collect::<Vec<_>>().join(" ");
        assert_eq!(word_count(&content), 31);
        assert_eq!(
            check_content(&content, 500, 30),
            Err(ContentError::TooManyWords { max: 30 })
        );
        assert_eq!(check_content("one two three", 500, 30), Ok(()));
    }

    #[test]
    fn char_ceiling_is_unicode_aware() {
        let content = "é".repeat(500);
        assert_eq!(check_content(&content, 500, 30), Ok(()));
    }
}
