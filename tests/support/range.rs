//! A wiremock responder serving a fixed body and honoring `Range` requests.

use std::sync::{Arc, Mutex};

use wiremock::{Request, Respond, ResponseTemplate};

/// Serves `body`, answering `bytes=a-b` / `bytes=a-` with 206 slices.
#[derive(Clone)]
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    ranges: Arc<Mutex<Vec<Option<String>>>>,
    disposition: Option<String>,
}

impl RangeResponder {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: Arc::new(body.into()),
            ranges: Arc::new(Mutex::new(Vec::new())),
            disposition: None,
        }
    }

    pub fn with_disposition(mut self, value: &str) -> Self {
        self.disposition = Some(value.to_string());
        self
    }

    /// `Range` header of every request seen, in arrival order.
    pub fn seen_ranges(&self) -> Vec<Option<String>> {
        self.ranges.lock().expect("ranges lock").clone()
    }

    fn parse(&self, header: &str) -> Option<(usize, usize)> {
        let span = header.strip_prefix("bytes=")?;
        let (start, end) = span.split_once('-')?;
        let start: usize = start.parse().ok()?;
        let last = self.body.len().checked_sub(1)?;
        let end = if end.is_empty() {
            last
        } else {
            end.parse::<usize>().ok()?.min(last)
        };
        (start <= end).then_some((start, end))
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.ranges.lock().expect("ranges lock").push(range.clone());

        let template = match range {
            None => ResponseTemplate::new(200).set_body_bytes(self.body.as_slice()),
            Some(header) => match self.parse(&header) {
                Some((start, end)) => ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{}", self.body.len()).as_str(),
                    )
                    .set_body_bytes(&self.body[start..=end]),
                None => ResponseTemplate::new(416).insert_header(
                    "Content-Range",
                    format!("bytes */{}", self.body.len()).as_str(),
                ),
            },
        };
        match &self.disposition {
            Some(value) => template.insert_header("Content-Disposition", value.as_str()),
            None => template,
        }
    }
}

/// Deterministic test payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).expect("fits")).collect()
}
