//! Transfer requests and their continuations.

use reqwest::{Method, Url};
use resumefetch_fast_open::ByteRange;

use crate::error::TransportError;

/// Target, method and optional byte range of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub url: Url,
    pub method: Method,
    pub range_start: Option<u64>,
    /// Inclusive upper bound.
    pub range_end: Option<u64>,
}

impl TransferRequest {
    /// Un-ranged GET of `url`.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            range_start: None,
            range_end: None,
        }
    }

    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme {other:?} in {url}"
                )));
            }
        }
        if url.host_str().is_none() {
            return Err(TransportError::InvalidUrl(format!("missing host in {url}")));
        }
        Ok(Self::get(url))
    }

    /// Same target, starting at `offset`, with an open upper bound.
    pub fn continuation(&self, offset: u64) -> Self {
        Self {
            url: self.url.clone(),
            method: self.method.clone(),
            range_start: Some(offset),
            range_end: None,
        }
    }

    pub fn with_range_end(mut self, end: u64) -> Self {
        self.range_end = Some(end);
        self
    }

    pub fn range(&self) -> Option<ByteRange> {
        self.range_start.map(|start| ByteRange {
            start,
            end: self.range_end,
        })
    }

    /// `Range` header value, or `None` for un-ranged requests.
    pub fn range_header(&self) -> Option<String> {
        self.range().map(|r| r.to_string())
    }

    pub fn is_ranged(&self) -> bool {
        self.range_start.is_some()
    }

    /// `host:port` of the target, for log context.
    pub fn target(&self) -> String {
        let host = self.url.host_str().unwrap_or("<none>");
        match self.url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_keeps_target_and_sets_offset() {
        let req = TransferRequest::parse("https://example.com/video.mkv").unwrap();
        assert!(!req.is_ranged());
        assert_eq!(req.range_header(), None);

        let cont = req.continuation(400);
        assert_eq!(cont.url, req.url);
        assert_eq!(cont.method, Method::GET);
        assert_eq!(cont.range_header().as_deref(), Some("bytes=400-"));

        let bounded = cont.with_range_end(999);
        assert_eq!(bounded.range_header().as_deref(), Some("bytes=400-999"));
    }

    #[test]
    fn continuation_from_zero() {
        let req = TransferRequest::parse("http://localhost:8080/a").unwrap();
        assert_eq!(req.continuation(0).range_header().as_deref(), Some("bytes=0-"));
    }

    #[test]
    fn target_includes_port() {
        let req = TransferRequest::parse("https://example.com/x").unwrap();
        assert_eq!(req.target(), "example.com:443");
        let req = TransferRequest::parse("http://127.0.0.1:9000/x").unwrap();
        assert_eq!(req.target(), "127.0.0.1:9000");
    }

    #[test]
    fn parse_rejects_bad_urls() {
        assert!(matches!(
            TransferRequest::parse("ftp://example.com/x"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(TransferRequest::parse("not a url").is_err());
    }
}
