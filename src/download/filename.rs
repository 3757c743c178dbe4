//! Filename extraction, sanitization, MIME guessing and duplicate counters.
//!
//! This module provides utilities for deriving safe filenames from URLs and
//! Content-Disposition headers, classifying MIME types, and producing
//! `"name (n).ext"` variants when a target already exists on disk.

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Splits `name (n).ext` into stem, optional counter and extension.
#[allow(clippy::expect_used)]
static COUNTER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)(?: \((\d+)\))?(\..+)?$").expect("counter regex is valid") // Static pattern, safe to panic
});

/// MIME type used when an extension is present but not recognised.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Parses Content-Disposition header to extract filename.
///
/// Handles both:
/// - `attachment; filename="example.bin"`
/// - `attachment; filename=example.bin`
/// - `attachment; filename*=UTF-8''example.bin` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    // filename*= (RFC 5987) takes priority
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // Format: charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = encoded[..end].trim().trim_matches('"');
            if let Ok(decoded) = urlencoding::decode(encoded_name) {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();

        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                let name = &stripped[..end];
                return (!name.is_empty()).then(|| name.to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Safe on-disk name for a name reported by the transfer.
///
/// Drops any trailing ` filename*=` remainder a lenient header parser may
/// have left in place, then sanitizes the rest.
#[must_use]
pub fn safe_name(raw: &str) -> String {
    let head = raw.split(" filename*=").next().unwrap_or(raw);
    sanitize_filename(base_name(head))
}

/// Last path component of a name, ignoring any directories it carries.
pub(crate) fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Filename taken from the last URL path segment, percent-decoded.
#[must_use]
pub fn name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    Some(decoded)
}

/// Lowercased extension (with leading dot) of the URL's filename.
pub(crate) fn extension_from_url(url: &str) -> Option<String> {
    let name = name_from_url(url)?;
    let dot_index = name.rfind('.')?;
    let ext = &name[dot_index..];
    if dot_index == 0 || ext.len() <= 1 || ext.len() > 12 {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Strips parameters from a Content-Type value and lowercases it.
pub(crate) fn mime_from_content_type(content_type: &str) -> Option<String> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    (!mime.is_empty()).then_some(mime)
}

/// Guess MIME type from a file extension (with leading dot).
///
/// Unknown extensions map to [`OCTET_STREAM`].
pub(crate) fn mime_from_extension(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        ".html" | ".htm" | ".shtml" => "text/html",
        ".xhtml" => "application/xhtml+xml",
        ".php" | ".asp" | ".aspx" | ".jsp" => "text/html",
        ".txt" => "text/plain",
        ".json" => "application/json",
        ".xml" => "application/xml",
        ".pdf" => "application/pdf",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".zip" => "application/zip",
        ".rar" => "application/vnd.rar",
        ".7z" => "application/x-7z-compressed",
        ".gz" => "application/gzip",
        ".tar" => "application/x-tar",
        ".mp4" => "video/mp4",
        ".mkv" => "video/x-matroska",
        ".avi" => "video/x-msvideo",
        ".mp3" => "audio/mpeg",
        ".iso" => "application/x-iso9660-image",
        _ => OCTET_STREAM,
    }
}

/// Returns true for HTML-family MIME types (`text/html`, `application/xhtml+xml`, ...).
pub(crate) fn is_html_mime(mime: &str) -> bool {
    mime.contains("html")
}

/// A filename split around an optional trailing `" (n)"` counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterName {
    /// Name without counter and extension.
    pub stem: String,
    /// Parsed counter, 0 when absent.
    pub counter: u32,
    /// Extension including the leading dot, empty when absent.
    pub extension: String,
}

impl CounterName {
    /// Parses `movie (2).mp4` into `("movie", 2, ".mp4")`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match COUNTER_PATTERN.captures(name) {
            Some(caps) => Self {
                stem: caps.get(1).map_or(name, |m| m.as_str()).to_string(),
                counter: caps
                    .get(2)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0),
                extension: caps
                    .get(3)
                    .map_or_else(String::new, |m| m.as_str().to_string()),
            },
            None => Self {
                stem: name.to_string(),
                counter: 0,
                extension: String::new(),
            },
        }
    }

    /// Renders the name with the given counter.
    #[must_use]
    pub fn with_counter(&self, counter: u32) -> String {
        format!("{} ({counter}){}", self.stem, self.extension)
    }
}

/// First `name (n).ext` variant, counting up from the parsed counter + 1,
/// that does not exist in `dir`.
#[must_use]
pub fn next_free_name(dir: &Path, name: &str) -> String {
    let parsed = CounterName::parse(name);
    let mut counter = parsed.counter;
    loop {
        counter = counter.saturating_add(1);
        let candidate = parsed.with_counter(counter);
        if !dir.join(&candidate).exists() || counter == u32::MAX {
            return candidate;
        }
    }
}
