//! Post-transfer integrity scan.
//!
//! Inspects the head of a finished file against ordered, labelled rules to
//! recognise known bad outcomes (an empty payload, a served error page).
//! Only the first `read_limit` bytes are ever loaded.

use std::path::Path;
use std::sync::LazyLock;

use regex::bytes::Regex;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use crate::download::DownloadError;

/// Label of the built-in empty-file rule.
pub const EMPTY_LABEL: &str = "empty";

/// Empty or whitespace-only buffer.
#[allow(clippy::expect_used)]
static EMPTY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A\s*\z").expect("empty-file regex is valid") // Static pattern, safe to panic
});

/// One matcher.
#[derive(Debug, Clone)]
pub enum ScanRule {
    /// Matches when the buffer contains these bytes.
    Literal(Vec<u8>),
    /// Matches when the pattern is found anywhere in the buffer.
    Pattern(Regex),
}

impl ScanRule {
    /// Literal substring rule.
    pub fn literal(needle: impl Into<Vec<u8>>) -> Self {
        Self::Literal(needle.into())
    }

    /// Pattern rule.
    ///
    /// # Errors
    ///
    /// Returns the regex error for an invalid pattern.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Pattern)
    }

    /// Returns true when the rule matches `buffer`.
    #[must_use]
    pub fn matches(&self, buffer: &[u8]) -> bool {
        match self {
            Self::Literal(needle) => {
                needle.is_empty() || buffer.windows(needle.len()).any(|window| window == needle)
            }
            Self::Pattern(regex) => regex.is_match(buffer),
        }
    }
}

/// Ordered label → rule mapping; the first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct ScanRuleSet {
    rules: Vec<(String, ScanRule)>,
}

impl ScanRuleSet {
    /// Empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in set: a single [`EMPTY_LABEL`] rule.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new().with(EMPTY_LABEL, ScanRule::Pattern(EMPTY_PATTERN.clone()))
    }

    /// Appends a rule.
    #[must_use]
    pub fn with(mut self, label: impl Into<String>, rule: ScanRule) -> Self {
        self.push(label, rule);
        self
    }

    /// Appends a rule in place.
    pub fn push(&mut self, label: impl Into<String>, rule: ScanRule) {
        self.rules.push((label.into(), rule));
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true when there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Label of the first rule matching `buffer`.
    #[must_use]
    pub fn first_match(&self, buffer: &[u8]) -> Option<&str> {
        self.rules
            .iter()
            .find(|(_, rule)| rule.matches(buffer))
            .map(|(label, _)| label.as_str())
    }
}

/// Scans the first `read_limit` bytes of `path`.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] when the file cannot be opened or read.
#[instrument(skip(rules), fields(path = %path.display()))]
pub async fn scan_file(
    path: &Path,
    rules: &ScanRuleSet,
    read_limit: u64,
) -> Result<Option<String>, DownloadError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let capacity = usize::try_from(read_limit.min(64 * 1024)).unwrap_or(0);
    let mut buffer = Vec::with_capacity(capacity);
    file.take(read_limit)
        .read_to_end(&mut buffer)
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    let label = rules.first_match(&buffer).map(str::to_string);
    debug!(bytes = buffer.len(), label = ?label, "scanned file head");
    Ok(label)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn scan_bytes(content: &[u8], rules: &ScanRuleSet, limit: u64) -> Option<String> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f.bin");
        std::fs::write(&path, content).unwrap();
        scan_file(&path, rules, limit).await.unwrap()
    }

    #[tokio::test]
    async fn test_empty_rule_matches_zero_bytes_and_whitespace() {
        let rules = ScanRuleSet::builtin();
        assert_eq!(scan_bytes(b"", &rules, 1024).await.as_deref(), Some("empty"));
        assert_eq!(
            scan_bytes(b" \n\t\r\n  ", &rules, 1024).await.as_deref(),
            Some("empty")
        );
    }

    #[tokio::test]
    async fn test_empty_rule_rejects_any_content() {
        let rules = ScanRuleSet::builtin();
        assert_eq!(scan_bytes(b"  x  ", &rules, 1024).await, None);
        assert_eq!(scan_bytes(&[0u8, 1, 2], &rules, 1024).await, None);
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let rules = ScanRuleSet::new()
            .with("html", ScanRule::pattern(r"(?i)<html").unwrap())
            .with("quota", ScanRule::literal("quota exceeded"));
        assert_eq!(
            scan_bytes(b"<HTML>quota exceeded</HTML>", &rules, 1024)
                .await
                .as_deref(),
            Some("html")
        );
        assert_eq!(
            scan_bytes(b"error: quota exceeded", &rules, 1024)
                .await
                .as_deref(),
            Some("quota")
        );
    }

    #[tokio::test]
    async fn test_read_limit_bounds_the_buffer() {
        let mut content = vec![b'a'; 4096];
        content.extend_from_slice(b"MARKER");
        let rules = ScanRuleSet::new().with("marker", ScanRule::literal("MARKER"));

        assert_eq!(scan_bytes(&content, &rules, 4096).await, None);
        assert_eq!(
            scan_bytes(&content, &rules, 8192).await.as_deref(),
            Some("marker")
        );
    }

    #[tokio::test]
    async fn test_whitespace_head_of_larger_file_counts_as_empty() {
        let mut content = vec![b' '; 16];
        content.extend_from_slice(b"data");
        assert_eq!(
            scan_bytes(&content, &ScanRuleSet::builtin(), 16)
                .await
                .as_deref(),
            Some("empty")
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = scan_file(
            &temp_dir.path().join("missing"),
            &ScanRuleSet::builtin(),
            1024,
        )
        .await;
        assert!(matches!(result, Err(DownloadError::Io { .. })));
    }

    #[test]
    fn test_literal_rule_edge_cases() {
        assert!(ScanRule::literal("").matches(b""));
        assert!(!ScanRule::literal("abc").matches(b"ab"));
        assert!(ScanRule::literal("abc").matches(b"xxabcxx"));
        assert!(ScanRule::pattern("(").is_err());
        assert_eq!(ScanRuleSet::builtin().len(), 1);
        assert!(ScanRuleSet::new().is_empty());
    }
}
