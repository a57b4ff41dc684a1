//! Interception decision and custom-scheme rewriting
//!
//! Assets the host wants streamed through the loader are handed to the player
//! with a custom scheme (`kino://cdn.example.com/video.mp4`). The platform
//! cannot load such URLs, so every loading request for them reaches the
//! loader, which fetches the matching `https://` URL itself.

use crate::{config::SchemeMapping, Error, Result};
use url::Url;

/// Routes custom-scheme URLs to their upstream form
#[derive(Debug, Clone)]
pub struct SchemeRouter {
    mappings: Vec<SchemeMapping>,
}

impl SchemeRouter {
    pub fn new(mappings: Vec<SchemeMapping>) -> Self {
        let mappings = mappings
            .into_iter()
            .map(|m| SchemeMapping::new(m.custom.to_ascii_lowercase(), m.upstream))
            .collect();
        Self { mappings }
    }

    /// True only for URLs in one of the configured custom schemes
    pub fn should_intercept(&self, url: &str) -> bool {
        self.mapping_for(url).is_some()
    }

    /// The http(s) URL actually fetched for an intercepted URL
    pub fn upstream_url(&self, url: &str) -> Result<Url> {
        let (mapping, rest) = self.mapping_for(url).ok_or_else(|| Error::UnsupportedScheme {
            url: url.to_string(),
        })?;
        let upstream = Url::parse(&format!("{}{}", mapping.upstream, rest))?;
        if upstream.host_str().is_none() {
            return Err(Error::InvalidUrl(format!("{} has no host", url)));
        }
        Ok(upstream)
    }

    /// Matching mapping and the URL remainder starting at the ':'
    fn mapping_for<'a>(&self, url: &'a str) -> Option<(&SchemeMapping, &'a str)> {
        let colon = url.find(':')?;
        let (scheme, rest) = url.split_at(colon);
        if scheme.is_empty() || !scheme.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return None;
        }
        self.mappings
            .iter()
            .find(|m| m.custom.eq_ignore_ascii_case(scheme))
            .map(|m| (m, rest))
    }
}
