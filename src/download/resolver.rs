//! Resource resolution: does a URL serve a file, and from where?
//!
//! The resolver walks redirects itself with header-only probes so it can
//! bound the depth, inspect every hop and decide whether the final response
//! describes downloadable content or an HTML page.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{CONNECTION, CONTENT_DISPOSITION, CONTENT_TYPE, HeaderName, LOCATION};
use tracing::{debug, instrument};
use url::Url;

use super::client::HttpClient;
use super::error::DownloadError;
use super::filename::{extension_from_url, is_html_mime, mime_from_content_type, mime_from_extension};

/// Headers of a header-only probe that drive resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw `Content-Disposition` value.
    pub content_disposition: Option<String>,
    /// Raw `Location` value.
    pub location: Option<String>,
    /// Raw `Content-Type` value.
    pub content_type: Option<String>,
    /// True when the server announced `Connection: close`.
    pub connection_close: bool,
}

/// Source of header-only probe responses.
#[async_trait]
pub trait HeaderProbe: Send + Sync {
    /// Issues one header-only request for `url` without following redirects.
    async fn probe(&self, url: &str) -> Result<ProbeResponse, DownloadError>;
}

#[async_trait]
impl<T: HeaderProbe + ?Sized> HeaderProbe for Arc<T> {
    async fn probe(&self, url: &str) -> Result<ProbeResponse, DownloadError> {
        (**self).probe(url).await
    }
}

#[async_trait]
impl HeaderProbe for HttpClient {
    async fn probe(&self, url: &str) -> Result<ProbeResponse, DownloadError> {
        let response = self.head(url).await?;
        let headers = response.headers();
        let text = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Ok(ProbeResponse {
            status: response.status().as_u16(),
            content_disposition: text(CONTENT_DISPOSITION),
            location: text(LOCATION),
            content_type: text(CONTENT_TYPE),
            connection_close: headers
                .get(CONNECTION)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.eq_ignore_ascii_case("close")),
        })
    }
}

/// Result of resolving a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Whether the final URL serves downloadable content.
    pub resource: bool,
    /// Last URL probed (after any redirects followed).
    pub url: String,
    /// Resumability after connection checks; may be forced off.
    pub resumable: bool,
    /// Number of probe requests issued.
    pub probes: u32,
    /// True when the redirect depth ran out before a decision.
    pub limit_reached: bool,
}

/// Determines whether URLs serve resources, following redirects up to a depth.
pub struct ResourceResolver<P: HeaderProbe + ?Sized> {
    probe: P,
}

impl<P: HeaderProbe> ResourceResolver<P> {
    /// Wraps a probe implementation.
    pub fn new(probe: P) -> Self {
        Self { probe }
    }
}

impl<P: HeaderProbe + ?Sized> ResourceResolver<P> {
    /// Resolves `url`.
    ///
    /// `max_redirects` bounds the number of probes and is clamped to at
    /// least 1; a value of 0 or below also marks redirect following as
    /// disabled, which together with `Connection: close` forces resumability
    /// off. Classification by content type is terminal: it never probes again.
    ///
    /// # Errors
    ///
    /// Returns the probe's [`DownloadError`] when a header request fails.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn resolve(
        &self,
        url: &str,
        max_redirects: i32,
        resumable: bool,
    ) -> Result<Resolution, DownloadError> {
        let follow_enabled = max_redirects > 0;
        let depth = u32::try_from(max_redirects.max(1)).unwrap_or(1);
        let mut resumable = resumable;
        let mut current = url.to_string();
        let mut header = self.probe.probe(&current).await?;
        let mut probes = 1;

        loop {
            if !follow_enabled && header.connection_close {
                resumable = false;
            }

            let resolution = |resource, limit_reached| Resolution {
                resource,
                url: current.clone(),
                resumable,
                probes,
                limit_reached,
            };

            if header.content_disposition.is_some() {
                debug!(url = %current, "content-disposition present, resource");
                return Ok(resolution(true, false));
            }

            if let Some(location) = header.location.as_deref() {
                if !matches!(header.status, 301 | 302) && !resumable {
                    debug!(status = header.status, "not following redirect");
                    return Ok(resolution(false, false));
                }
                if probes >= depth {
                    debug!(depth, "redirect limit reached");
                    return Ok(resolution(false, true));
                }
                let next = join_location(&current, location)?;
                debug!(redirect = probes, to = %next, "following redirect");
                header = self.probe.probe(&next).await?;
                current = next;
                probes += 1;
                continue;
            }

            let mime = header
                .content_type
                .as_deref()
                .and_then(mime_from_content_type)
                .or_else(|| {
                    extension_from_url(&current).map(|ext| mime_from_extension(&ext).to_string())
                });
            let resource = mime.as_deref().is_some_and(|mime| !is_html_mime(mime));
            debug!(mime = ?mime, resource, "classified by content type");
            return Ok(resolution(resource, false));
        }
    }
}

fn join_location(base: &str, location: &str) -> Result<String, DownloadError> {
    let base_url = Url::parse(base).map_err(|_| DownloadError::invalid_url(base))?;
    base_url
        .join(location)
        .map(String::from)
        .map_err(|_| DownloadError::invalid_url(location))
}
