//! Input validation for user-authored text: length limits and a word-list
//! content filter.

use std::collections::HashSet;
use std::path::Path;

pub const TITLE_MAX_CHARS: usize = 25;
pub const DESCRIPTION_MAX_CHARS: usize = 100;
pub const COURSE_CODE_MAX_CHARS: usize = 10;
pub const EXTERNAL_LINK_MAX_CHARS: usize = 100;
pub const COMMENT_MAX_CHARS: usize = 500;
pub const GROUP_NAME_MAX_CHARS: usize = 50;
pub const GROUP_DESCRIPTION_MAX_CHARS: usize = 500;
pub const USERNAME_MAX_CHARS: usize = 30;

const DEFAULT_BLOCKLIST: &[&str] = &[
    "arse", "asshole", "bastard", "bitch", "bollocks", "bullshit", "crap", "cunt", "dick",
    "fuck", "fucking", "motherfucker", "piss", "prick", "shit", "slut", "twat", "wanker",
    "whore",
];

/// A field failed validation. The message is shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Reject `value` if it is longer than `max` characters (not bytes).
pub fn check_length(
    field: &'static str,
    label: &str,
    value: &str,
    max: usize,
) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::new(
            field,
            format!("{label} must be {max} characters or less"),
        ));
    }
    Ok(())
}

/// Reject a value that is empty after trimming.
pub fn require_non_empty(
    field: &'static str,
    label: &str,
    value: &str,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, format!("{label} is required")));
    }
    Ok(())
}

/// Case-insensitive whole-word blocklist.
#[derive(Debug, Clone)]
pub struct WordFilter {
    words: HashSet<String>,
}

impl Default for WordFilter {
    fn default() -> Self {
        Self::from_words(DEFAULT_BLOCKLIST.iter().copied())
    }
}

impl WordFilter {
    pub fn from_words<'a>(words: impl IntoIterator<Item = &'a str>) -> Self {
        let words = words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty() && !w.starts_with('#'))
            .collect();
        Self { words }
    }

    /// Load a newline-separated word list. Blank lines and `#` comments are
    /// skipped.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_words(text.lines()))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains_blocked(&self, text: &str) -> bool {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .any(|token| self.words.contains(token))
    }

    pub fn check(
        &self,
        field: &'static str,
        label: &str,
        value: &str,
    ) -> Result<(), ValidationError> {
        if self.contains_blocked(value) {
            return Err(ValidationError::new(
                field,
                format!("{label} contains inappropriate language"),
            ));
        }
        Ok(())
    }
}

/// Validate the editable text fields of a resource. Limits are checked
/// before the content filter so the first reported problem is the cheaper
/// one to fix.
pub fn validate_resource_fields(
    filter: &WordFilter,
    title: &str,
    description: Option<&str>,
    course_code: Option<&str>,
    external_link: Option<&str>,
) -> Result<(), ValidationError> {
    require_non_empty("title", "Title", title)?;
    check_length("title", "Title", title, TITLE_MAX_CHARS)?;
    if let Some(description) = description {
        check_length("description", "Description", description, DESCRIPTION_MAX_CHARS)?;
    }
    if let Some(code) = course_code {
        check_length("course_code", "Course code", code, COURSE_CODE_MAX_CHARS)?;
    }
    if let Some(link) = external_link {
        check_length("external_link", "External URL", link, EXTERNAL_LINK_MAX_CHARS)?;
    }

    filter.check("title", "Title", title)?;
    if let Some(description) = description {
        filter.check("description", "Description", description)?;
    }
    if let Some(code) = course_code {
        filter.check("course_code", "Course code", code)?;
    }
    Ok(())
}

/// Validate and trim comment text.
pub fn validate_comment(filter: &WordFilter, content: &str) -> Result<String, ValidationError> {
    let content = content.trim();
    require_non_empty("content", "Comment", content)?;
    check_length("content", "Comment", content, COMMENT_MAX_CHARS)?;
    filter.check("content", "Comment", content)?;
    Ok(content.to_string())
}
