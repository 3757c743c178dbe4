//! Assembly of the URL list from positional arguments and/or stdin.

use std::io::{self, IsTerminal, Read};

use anyhow::Result;

/// Collects URLs from `urls` and, when stdin is piped, from stdin.
pub(crate) fn collect_urls(urls: &[String]) -> Result<Vec<String>> {
    let mut text = urls.join("\n");
    if !io::stdin().is_terminal() && urls.is_empty() {
        io::stdin().read_to_string(&mut text)?;
    }
    Ok(parse_url_lines(&text))
}

/// One URL per whitespace-separated token; `#` starts a comment line.
pub(crate) fn parse_url_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect()
}
